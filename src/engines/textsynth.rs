use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::SearchOutcome;
use crate::prompt;

use super::{AnswerEngine, GenerationRequest, NO_COMPLETION_MESSAGE};

const SYSTEM_INSTRUCTION: &str = "Only respond if the answer is contained in the text above";

/// TextSynth-hosted models (falcon, mistral instruct). These backends are
/// sensitive to context-boundary confusion, so passages are fenced with
/// `***` delimiters, and a stop sequence keeps the model from inventing a
/// follow-up turn.
pub struct TextSynthEngine {
    client: Client,
    base_url: String,
    api_key: String,
    engine: String,
    stop: Option<String>,
}

impl TextSynthEngine {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        engine: impl Into<String>,
        stop: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            engine: engine.into(),
            stop,
        }
    }
}

#[async_trait::async_trait]
impl AnswerEngine for TextSynthEngine {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<SearchOutcome> {
        let context = prompt::delimited_context(request.passages);
        let input = prompt::assemble(request.prompt_template, request.question, &context);
        let token_count = prompt::count_tokens(&input);
        tracing::debug!(engine = %self.engine, token_count, "assembled generation prompt");

        let url = format!("{}/v1/engines/{}/chat", self.base_url, self.engine);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                system: SYSTEM_INSTRUCTION,
                messages: vec![input.as_str()],
                max_tokens: 500,
                temperature: 0.2,
                top_k: 10,
                top_p: 0.5,
                stop: self.stop.as_deref(),
            })
            .send()
            .await
            .with_context(|| format!("failed to call textsynth engine {}", self.engine))?
            .error_for_status()
            .with_context(|| format!("textsynth engine {} rejected the request", self.engine))?
            .json::<ChatResponse>()
            .await
            .context("failed to decode textsynth response")?;

        let result = match response.text {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => NO_COMPLETION_MESSAGE.to_string(),
        };

        Ok(SearchOutcome {
            result,
            input,
            token_count,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    system: &'a str,
    messages: Vec<&'a str>,
    max_tokens: usize,
    temperature: f32,
    top_k: usize,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: Option<String>,
}
