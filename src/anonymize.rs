use anyhow::{Context, Result};
use bloomfilter::Bloom;
use regex::Regex;

use crate::config::AnonymizerConfig;
use crate::ner::{NamedEntity, NerClient, PERSON_LABEL};

pub const PERSON_PLACEHOLDER: &str = "Madame/Monsieur";
pub const REDACTION_PLACEHOLDER: &str = "CONFIDENTIEL";
pub const EMAIL_PLACEHOLDER: &str = "private@example.com";

/// Strips personally identifying content from a text before it reaches any
/// model: person names found by the recognizer, French phone numbers, NUMEN
/// identifiers, 15-digit national-ID-style runs and email addresses.
#[derive(Clone)]
pub struct Anonymizer {
    ner: NerClient,
    entity_capacity: usize,
    false_positive_rate: f64,
}

impl Anonymizer {
    pub fn new(ner: NerClient, config: &AnonymizerConfig) -> Self {
        Self {
            ner,
            entity_capacity: config.entity_capacity,
            false_positive_rate: config.false_positive_rate,
        }
    }

    /// Redaction is a privacy control: a recognizer outage fails the call
    /// loudly instead of letting un-redacted text through.
    pub async fn anonymize(&self, text: &str) -> Result<String> {
        let entities = self
            .ner
            .find_entities(text)
            .await
            .context("anonymization aborted: entity recognizer unavailable")?;

        let redacted = redact_entities(
            text,
            &entities,
            self.entity_capacity,
            self.false_positive_rate,
        )?;
        Ok(redact_patterns(&redacted))
    }
}

/// Replaces every occurrence of each person-name span with the neutral
/// placeholder. Repeated mentions of the same name string are deduplicated
/// through a Bloom filter built fresh for this call; a false positive only
/// means a name is treated as already seen and still redacted, which is
/// harmless.
pub fn redact_entities(
    text: &str,
    entities: &[NamedEntity],
    entity_capacity: usize,
    false_positive_rate: f64,
) -> Result<String> {
    let mut seen: Bloom<String> = Bloom::new_for_fp_rate(entity_capacity.max(1), false_positive_rate)
        .map_err(|err| anyhow::anyhow!("failed to build the seen-entity filter: {err}"))?;

    for entity in entities {
        if entity.label == PERSON_LABEL {
            seen.set(&entity.text);
        }
    }

    let mut out = text.to_string();
    for entity in entities {
        if entity.label == PERSON_LABEL && seen.check(&entity.text) {
            out = out.replace(&entity.text, PERSON_PLACEHOLDER);
        }
    }

    Ok(out)
}

/// Pattern passes, in order: phone, NUMEN template, 15-digit run, email.
/// Email runs last so the placeholder address inserted here is never
/// re-matched by an earlier pass.
pub fn redact_patterns(text: &str) -> String {
    let phone = Regex::new(r"\b0\d(?:[\s.\-]?\d{2}){4}\b")
        .unwrap_or_else(|_| Regex::new("^$").unwrap());
    let numen = Regex::new(r"\b\d{2}[A-Z]\d{7}[A-Z]{3}\b")
        .unwrap_or_else(|_| Regex::new("^$").unwrap());
    let insee = Regex::new(r"\b\d{15}\b").unwrap_or_else(|_| Regex::new("^$").unwrap());
    let email = Regex::new(r"[\w.\-]+@[\w.\-]+").unwrap_or_else(|_| Regex::new("^$").unwrap());

    let text = phone.replace_all(text, REDACTION_PLACEHOLDER);
    let text = numen.replace_all(&text, REDACTION_PLACEHOLDER);
    let text = insee.replace_all(&text, REDACTION_PLACEHOLDER);
    email.replace_all(&text, EMAIL_PLACEHOLDER).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(name: &str) -> NamedEntity {
        NamedEntity {
            label: PERSON_LABEL.to_string(),
            text: name.to_string(),
        }
    }

    #[test]
    fn every_occurrence_of_a_name_is_replaced() {
        let text = "Jean Pierre a écrit. Jean Pierre attend une réponse.";
        let out = redact_entities(text, &[person("Jean Pierre")], 1000, 0.1).expect("redact");
        assert_eq!(
            out,
            "Madame/Monsieur a écrit. Madame/Monsieur attend une réponse."
        );
    }

    #[test]
    fn several_names_are_all_replaced() {
        let text = "Bonjour, je m'appelle John Doe, que puis-je faire ? Bien cordialement, Jérôme Blondon";
        let out = redact_entities(
            text,
            &[person("John Doe"), person("Jérôme Blondon")],
            1000,
            0.1,
        )
        .expect("redact");
        assert_eq!(
            out,
            "Bonjour, je m'appelle Madame/Monsieur, que puis-je faire ? Bien cordialement, Madame/Monsieur"
        );
    }

    #[test]
    fn non_person_entities_are_kept() {
        let entities = vec![NamedEntity {
            label: "LOC".to_string(),
            text: "Paris".to_string(),
        }];
        let out = redact_entities("affecté au rectorat de Paris", &entities, 1000, 0.1)
            .expect("redact");
        assert_eq!(out, "affecté au rectorat de Paris");
    }

    #[test]
    fn text_without_anything_to_redact_is_unchanged() {
        let text = "Il n'y a rien à anonymiser ici";
        let out = redact_entities(text, &[], 1000, 0.1).expect("redact");
        assert_eq!(redact_patterns(&out), text);
    }

    #[test]
    fn phone_number_formats_reduce_to_the_redaction_token() {
        for text in ["0612345678", "06 12 34 56 78", "06.12.34.56.78"] {
            assert_eq!(
                redact_patterns(&format!("joignable au {text} merci")),
                format!("joignable au {REDACTION_PLACEHOLDER} merci")
            );
        }
    }

    #[test]
    fn numen_reduces_to_the_redaction_token() {
        assert_eq!(
            redact_patterns("mon numen est le 46G9987654XYZ"),
            format!("mon numen est le {REDACTION_PLACEHOLDER}")
        );
    }

    #[test]
    fn fifteen_digit_run_reduces_to_the_redaction_token() {
        assert_eq!(
            redact_patterns("numéro 184057510201234 communiqué"),
            format!("numéro {REDACTION_PLACEHOLDER} communiqué")
        );
    }

    #[test]
    fn email_reduces_to_the_placeholder_address() {
        assert_eq!(
            redact_patterns("mon email est foo@bar.com"),
            format!("mon email est {EMAIL_PLACEHOLDER}")
        );
    }

    #[test]
    fn entity_then_pattern_passes_compose() {
        let text = "Bonjour, je m'appelle John Doe, mon numen est le 46G9987654XYZ";
        let out = redact_entities(text, &[person("John Doe")], 1000, 0.1).expect("redact");
        assert_eq!(
            redact_patterns(&out),
            format!("Bonjour, je m'appelle {PERSON_PLACEHOLDER}, mon numen est le {REDACTION_PLACEHOLDER}")
        );
    }
}
