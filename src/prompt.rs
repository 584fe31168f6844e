use chrono::{Local, Locale};

use crate::models::RetrievedPassage;

/// Substitutes both placeholders exactly once. Passage text or questions
/// containing a literal placeholder must never trigger a second expansion.
pub fn assemble(template: &str, question: &str, context: &str) -> String {
    template
        .replacen("{context}", context, 1)
        .replacen("{question}", question, 1)
}

/// Token counting scheme shared by every backend: whitespace-separated
/// words. Counts are for observability and generation budgets, not billing.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Context joiner for chat backends: each passage's first line becomes a
/// `###` heading, passages joined by a plain newline.
pub fn headed_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|passage| format_content(&passage.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Context joiner for backends sensitive to context-boundary confusion:
/// passages fenced by `***` delimiters.
pub fn delimited_context(passages: &[RetrievedPassage]) -> String {
    let joined = passages
        .iter()
        .map(|passage| passage.content.clone())
        .collect::<Vec<_>>()
        .join("\n***\n");
    format!("\n***\n{joined}\n***\n")
}

/// Context joiner using a bare `###` line separator.
pub fn hashed_context(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .map(|passage| passage.content.clone())
        .collect::<Vec<_>>()
        .join("###\n")
}

/// Current-date preamble injected ahead of the category template by the
/// date-aware backends.
pub fn date_preamble() -> String {
    let formatted = Local::now().format_localized("%d %B %Y à %H:%M", Locale::fr_FR);
    format!("Nous sommes le {formatted}\n")
}

fn format_content(content: &str) -> String {
    let mut lines: Vec<String> = content.split('\n').map(|line| line.to_string()).collect();
    if let Some(first) = lines.first_mut() {
        *first = format!("### {first}");
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(content: &str) -> RetrievedPassage {
        RetrievedPassage {
            content: content.to_string(),
            origin: "Guide RH".to_string(),
            page: Some(1),
            score: 0.9,
        }
    }

    #[test]
    fn placeholders_are_substituted_exactly_once() {
        let template = "Contexte: {context}\nQuestion: {question}\nNote: {context}";
        let assembled = assemble(template, "ma question", "le contexte");
        assert_eq!(
            assembled,
            "Contexte: le contexte\nQuestion: ma question\nNote: {context}"
        );
    }

    #[test]
    fn a_question_containing_a_placeholder_does_not_expand_again() {
        let assembled = assemble("{question} / {context}", "{context}", "CTX");
        assert_eq!(assembled, "{context} / CTX");
    }

    #[test]
    fn token_count_uses_whitespace_words() {
        assert_eq!(count_tokens("un deux  trois\nquatre"), 4);
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn headed_context_promotes_first_lines() {
        let context = headed_context(&[passage("Titre\ncorps"), passage("Autre")]);
        assert_eq!(context, "### Titre\ncorps\n### Autre");
    }

    #[test]
    fn delimited_context_fences_every_passage() {
        let context = delimited_context(&[passage("un"), passage("deux")]);
        assert_eq!(context, "\n***\nun\n***\ndeux\n***\n");
    }

    #[test]
    fn hashed_context_joins_with_hash_lines() {
        let context = hashed_context(&[passage("un"), passage("deux")]);
        assert_eq!(context, "un###\ndeux");
    }

    #[test]
    fn empty_passages_still_assemble_a_prompt() {
        let context = headed_context(&[]);
        let assembled = assemble("C: {context} Q: {question}", "q", &context);
        assert_eq!(assembled, "C:  Q: q");
    }

    #[test]
    fn date_preamble_is_french() {
        assert!(date_preamble().starts_with("Nous sommes le "));
    }
}
