use anyhow::{Context, Result};
use regex::escape;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::SearchOutcome;
use crate::prompt;

use super::{AnswerEngine, GenerationRequest, NO_COMPLETION_MESSAGE};

/// Generation stops at the first of these markers so the model never
/// hallucinates a follow-up turn.
const STOP_WORDS: &[&str] = &["Question:", "User:"];

/// Self-hosted Paradigm deployment reached over its remote-model API.
pub struct ParadigmEngine {
    client: Client,
    host: String,
    model: String,
}

impl ParadigmEngine {
    pub fn new(client: Client, host: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
            model: model.into(),
        }
    }
}

#[async_trait::async_trait]
impl AnswerEngine for ParadigmEngine {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<SearchOutcome> {
        let context = prompt::hashed_context(request.passages);
        let input = prompt::assemble(request.prompt_template, request.question, &context);
        let token_count = prompt::count_tokens(&input);
        tracing::debug!(model = %self.model, token_count, "assembled generation prompt");

        let url = format!("{}/completions", self.host);
        let response = self
            .client
            .post(url)
            .json(&CompletionRequest {
                model: &self.model,
                prompt: &input,
                n_tokens: 512,
                temperature: 0.01,
                stop_regex: &stop_regex(STOP_WORDS),
            })
            .send()
            .await
            .context("failed to call the paradigm host")?
            .error_for_status()
            .context("paradigm host rejected the request")?
            .json::<CompletionResponse>()
            .await
            .context("failed to decode paradigm response")?;

        Ok(SearchOutcome {
            result: first_completion(response.completions),
            input,
            token_count,
        })
    }
}

/// Case-insensitive alternation over the stop words, each escaped.
fn stop_regex(words: &[&str]) -> String {
    let escaped: Vec<String> = words.iter().map(|word| escape(word)).collect();
    format!("(?i)({})", escaped.join("|"))
}

fn first_completion(completions: Vec<Completion>) -> String {
    completions
        .into_iter()
        .next()
        .map(|completion| completion.output_text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| NO_COMPLETION_MESSAGE.to_string())
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n_tokens: usize,
    temperature: f32,
    stop_regex: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    completions: Vec<Completion>,
}

#[derive(Deserialize)]
struct Completion {
    output_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_regex_escapes_and_joins_words() {
        assert_eq!(stop_regex(&["Question:", "User:"]), "(?i)(Question:|User:)");
    }

    #[test]
    fn zero_completions_become_the_no_completion_result() {
        assert_eq!(first_completion(vec![]), NO_COMPLETION_MESSAGE);
    }

    #[test]
    fn the_first_completion_wins() {
        let completions = vec![
            Completion {
                output_text: " première réponse ".to_string(),
            },
            Completion {
                output_text: "seconde".to_string(),
            },
        ];
        assert_eq!(first_completion(completions), "première réponse");
    }
}
