use std::collections::HashMap;

/// Curation hints attached to a document, keyed by page number or applying
/// to every page. The admin writes them as `page 3 : texte`,
/// `pages 1 à 4 : texte` or `toutes pages: texte`, separated by `;` or
/// newlines.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageHints {
    by_page: HashMap<i64, Vec<String>>,
    all: Vec<String>,
}

impl PageHints {
    pub fn is_empty(&self) -> bool {
        self.by_page.is_empty() && self.all.is_empty()
    }

    /// Hints applying to the given page: the "all pages" ones first, then
    /// the page-specific ones.
    pub fn for_page(&self, page: Option<i64>) -> Vec<String> {
        let mut out = self.all.clone();
        if let Some(page) = page {
            if let Some(hints) = self.by_page.get(&page) {
                out.extend(hints.iter().cloned());
            }
        }
        out
    }
}

/// Parses the hints field. Malformed entries (no colon, unparseable page
/// numbers) are skipped rather than failing the whole document.
pub fn parse_hints(hints: &str) -> PageHints {
    let mut parsed = PageHints::default();

    if hints.trim().is_empty() {
        return parsed;
    }

    for raw in hints.replace('\n', ";").split(';') {
        let hint = raw.trim();
        let Some((prefix, text)) = hint.split_once(':') else {
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        if prefix.contains("toutes pages") {
            parsed.all.push(text.to_string());
        } else if prefix.contains("pages") {
            let range = prefix.replace("pages", "");
            let Some((start, end)) = parse_page_range(&range) else {
                continue;
            };
            for page in start..=end {
                parsed
                    .by_page
                    .entry(page)
                    .or_default()
                    .push(text.to_string());
            }
        } else if prefix.contains("page") {
            let Ok(page) = prefix.replace("page", "").trim().parse::<i64>() else {
                continue;
            };
            parsed
                .by_page
                .entry(page)
                .or_default()
                .push(text.to_string());
        }
    }

    parsed
}

fn parse_page_range(range: &str) -> Option<(i64, i64)> {
    let (start, end) = range.split_once('à')?;
    let start = start.trim().parse::<i64>().ok()?;
    let end = end.trim().parse::<i64>().ok()?;
    if start > end {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hints_parse_to_nothing() {
        assert!(parse_hints("").is_empty());
    }

    #[test]
    fn single_page_hint() {
        let parsed = parse_hints("page 1 : test");
        assert_eq!(parsed.for_page(Some(1)), vec!["test"]);
        assert!(parsed.for_page(Some(2)).is_empty());
    }

    #[test]
    fn page_range_hint_covers_every_page() {
        let parsed = parse_hints("pages 1 à 3 : truc specifique");
        for page in 1..=3 {
            assert_eq!(parsed.for_page(Some(page)), vec!["truc specifique"]);
        }
        assert!(parsed.for_page(Some(4)).is_empty());
    }

    #[test]
    fn hints_for_several_pages() {
        let parsed = parse_hints("page 1 : test;page 2: foo");
        assert_eq!(parsed.for_page(Some(1)), vec!["test"]);
        assert_eq!(parsed.for_page(Some(2)), vec!["foo"]);
    }

    #[test]
    fn repeated_page_accumulates_hints() {
        let parsed = parse_hints("page 1 : test;page 1: foo");
        assert_eq!(parsed.for_page(Some(1)), vec!["test", "foo"]);
    }

    #[test]
    fn all_pages_hint_applies_everywhere() {
        let parsed = parse_hints("page 1 : test;toutes pages: encore");
        assert_eq!(parsed.for_page(Some(1)), vec!["encore", "test"]);
        assert_eq!(parsed.for_page(Some(7)), vec!["encore"]);
        assert_eq!(parsed.for_page(None), vec!["encore"]);
    }

    #[test]
    fn newline_separated_hints_parse_too() {
        let parsed = parse_hints("page 1 : test\npage 2: foo");
        assert_eq!(parsed.for_page(Some(2)), vec!["foo"]);
    }

    #[test]
    fn malformed_hints_are_skipped() {
        assert!(parse_hints("some incorrect hint format").is_empty());
        assert!(parse_hints("page abc : oops").is_empty());
    }
}
