use regex::Regex;

/// Marker used by FAQ-style documents. A paragraph break is forced before
/// each occurrence so the splitter keeps a question and its answer together.
const FAQ_MARKER: &str = "Question:";

/// Cleans extracted page text. With `full`, blank-line runs collapse to one
/// newline, edges are trimmed and whitespace runs collapse to one space.
/// In both modes the FAQ marker gets a paragraph break injected before it.
pub fn clean_text(text: &str, full: bool) -> String {
    let mut text = text.to_string();

    if full {
        let newlines = Regex::new(r"\n+").unwrap_or_else(|_| Regex::new("^$").unwrap());
        text = newlines.replace_all(&text, "\n").into_owned();
        text = text.trim().to_string();
        let whitespace = Regex::new(r"\s+").unwrap_or_else(|_| Regex::new("^$").unwrap());
        text = whitespace.replace_all(&text, " ").into_owned();
    }

    text.replace(FAQ_MARKER, &format!("\n\n\n\n{FAQ_MARKER}"))
}

/// Splits flat text into passages bounded by `chunk_size` words, overlapping
/// by roughly `chunk_overlap` words. Paragraph blocks (blank-line separated)
/// are kept whole when they fit; oversized blocks fall back to sentence
/// packing, and a single oversized sentence falls back to a word window.
pub fn split_flat(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![];
    }

    let mut units: Vec<String> = Vec::new();
    for block in blank_line_blocks(text) {
        if word_count(&block) <= chunk_size {
            units.push(block);
        } else {
            units.extend(pack_oversized_block(&block, chunk_size, chunk_overlap));
        }
    }

    let mut chunks = pack_units(&units, chunk_size, chunk_overlap, "\n");
    chunks.retain(|chunk| !chunk.trim().is_empty());
    chunks
}

/// Splits outline-style markdown into passages labeled with the breadcrumb
/// of open headings. A heading at depth `d` truncates the title stack to
/// `d - 1` entries before pushing itself; the paragraph accumulated since
/// the previous heading is flushed as one passage, breadcrumb first.
pub fn split_markdown(markdown_text: &str) -> Vec<String> {
    let heading = Regex::new(r"^(#+)\s+(.+)").unwrap_or_else(|_| Regex::new("^$").unwrap());

    let mut titles: Vec<String> = Vec::new();
    let mut current_paragraph: Vec<String> = Vec::new();
    let mut passages: Vec<String> = Vec::new();

    for line in markdown_text.lines() {
        let stripped = line.trim();

        if let Some(caps) = heading.captures(stripped) {
            let depth = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
            let title = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();

            flush_paragraph(&titles, &mut current_paragraph, &mut passages);

            titles.truncate(depth.saturating_sub(1));
            titles.push(title);
        } else {
            current_paragraph.push(stripped.to_string());
        }
    }

    flush_paragraph(&titles, &mut current_paragraph, &mut passages);
    passages
}

fn flush_paragraph(titles: &[String], paragraph: &mut Vec<String>, passages: &mut Vec<String>) {
    if paragraph.is_empty() {
        return;
    }

    let content = paragraph.join("\n").trim().to_string();
    if !content.is_empty() {
        passages.push(format!("{}\n{}", titles.join(" > "), content));
    }
    paragraph.clear();
}

fn blank_line_blocks(text: &str) -> Vec<String> {
    let blanks = Regex::new(r"\n\s*\n").unwrap_or_else(|_| Regex::new("^$").unwrap());
    blanks
        .split(text)
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

/// A block too big for one chunk: sentence-pack it, and word-window any
/// sentence that alone exceeds the chunk size.
fn pack_oversized_block(block: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut units: Vec<String> = Vec::new();
    for sentence in split_sentences(block) {
        if word_count(&sentence) > chunk_size {
            units.extend(window_words(&sentence, chunk_size, chunk_overlap));
        } else {
            units.push(sentence);
        }
    }
    pack_units(&units, chunk_size, chunk_overlap, " ")
}

/// Greedy packing of units into chunks of at most `chunk_size` words. Each
/// new chunk is seeded with the trailing units of the previous one, up to
/// `chunk_overlap` words.
fn pack_units(units: &[String], chunk_size: usize, chunk_overlap: usize, joiner: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_words = 0usize;

    for unit in units {
        let words = word_count(unit);

        if current_words + words > chunk_size && !current.is_empty() {
            chunks.push(current.join(joiner));

            let mut seed: Vec<String> = Vec::new();
            let mut seed_words = 0usize;
            for prev in current.iter().rev() {
                let prev_words = word_count(prev);
                if seed_words + prev_words > chunk_overlap {
                    break;
                }
                seed.insert(0, prev.clone());
                seed_words += prev_words;
            }
            current = seed;
            current_words = seed_words;
        }

        current_words += words;
        current.push(unit.clone());
    }

    if !current.is_empty() {
        chunks.push(current.join(joiner));
    }

    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

fn window_words(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let mut out = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        out.push(tokens[start..end].join(" "));
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    out
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_whitespace_and_marks_faq_blocks() {
        let cleaned = clean_text("a  b\n\n\nc   Question: quoi ?", true);
        assert_eq!(cleaned, "a b c \n\n\n\nQuestion: quoi ?");
    }

    #[test]
    fn clean_without_full_only_marks_faq_blocks() {
        let cleaned = clean_text("ligne 1\nQuestion: quoi ?", false);
        assert_eq!(cleaned, "ligne 1\n\n\n\n\nQuestion: quoi ?");
    }

    #[test]
    fn markdown_passages_carry_breadcrumbs() {
        let passages = split_markdown("# T1\nBody1\n## T2\nBody2");
        assert_eq!(passages, vec!["T1\nBody1", "T1 > T2\nBody2"]);
    }

    #[test]
    fn markdown_heading_depth_truncates_the_title_stack() {
        let text = "# A\none\n## B\ntwo\n### C\nthree\n## D\nfour";
        let passages = split_markdown(text);
        assert_eq!(
            passages,
            vec!["A\none", "A > B\ntwo", "A > B > C\nthree", "A > D\nfour"]
        );
    }

    #[test]
    fn markdown_drops_whitespace_only_paragraphs() {
        let passages = split_markdown("# A\n\n   \n## B\ncontenu");
        assert_eq!(passages, vec!["A > B\ncontenu"]);
    }

    #[test]
    fn markdown_flushes_the_trailing_paragraph() {
        let passages = split_markdown("# Seul\ndernier paragraphe");
        assert_eq!(passages, vec!["Seul\ndernier paragraphe"]);
    }

    #[test]
    fn flat_split_respects_chunk_size_with_overlap() {
        let text = (1..=120)
            .map(|n| format!("mot{n}."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_flat(&text, 50, 10);

        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| word_count(c) <= 50));

        // the second chunk opens with sentences already seen at the end of
        // the first one
        let first_of_second = chunks[1].split_whitespace().next().unwrap_or_default();
        assert!(chunks[0].contains(first_of_second));
    }

    #[test]
    fn faq_question_stays_with_its_answer() {
        let raw = format!(
            "{} intro.\nQuestion: ai-je droit au supplément ? Réponse: oui, sous conditions.",
            "préambule ".repeat(5)
        );
        let cleaned = clean_text(&raw, true);
        let chunks = split_flat(&cleaned, 40, 5);

        let qa_chunk = chunks
            .iter()
            .find(|c| c.contains("Question:"))
            .expect("question chunk");
        assert!(qa_chunk.contains("Réponse: oui"));
    }

    #[test]
    fn oversized_sentence_falls_back_to_word_windows() {
        let long_sentence = (1..=90).map(|n| format!("w{n}")).collect::<Vec<_>>().join(" ");
        let chunks = split_flat(&long_sentence, 30, 5);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| word_count(c) <= 30));
    }
}
