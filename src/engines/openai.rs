use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::SearchOutcome;
use crate::prompt;
use crate::stream::TokenSink;

use super::{AnswerEngine, GenerationRequest, NO_COMPLETION_MESSAGE};

enum OpenAiMode {
    Chat,
    Completion,
}

/// OpenAI-compatible backend, covering the hosted chat and instruct models
/// as well as local servers speaking the same protocol. Completion-mode
/// models carry a fixed context window: the generation budget is the window
/// minus the prompt's tokens, and a non-positive budget is a hard error.
pub struct OpenAiEngine {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    mode: OpenAiMode,
    context_window: Option<usize>,
}

impl OpenAiEngine {
    pub fn chat(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            mode: OpenAiMode::Chat,
            context_window: None,
        }
    }

    pub fn completion(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        context_window: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            mode: OpenAiMode::Completion,
            context_window: Some(context_window),
        }
    }

    fn request_builder(&self, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }

    async fn complete_plain(&self, prompt: &str, max_tokens: Option<usize>) -> Result<String> {
        let response = match self.mode {
            OpenAiMode::Chat => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                self.request_builder(url)
                    .json(&ChatRequest {
                        model: &self.model,
                        messages: vec![Message {
                            role: "user",
                            content: prompt,
                        }],
                        temperature: 0.0,
                        stream: false,
                        max_tokens,
                    })
                    .send()
                    .await
            }
            OpenAiMode::Completion => {
                let url = format!("{}/v1/completions", self.base_url);
                self.request_builder(url)
                    .json(&CompletionRequest {
                        model: &self.model,
                        prompt,
                        temperature: 0.0,
                        stream: false,
                        max_tokens,
                    })
                    .send()
                    .await
            }
        }
        .with_context(|| format!("failed to call generation endpoint for {}", self.model))?
        .error_for_status()
        .with_context(|| format!("generation request for {} was rejected", self.model))?
        .json::<CompletionResponse>()
        .await
        .context("failed to decode generation response")?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.map(|m| m.content).or(choice.text))
            .unwrap_or_default();

        Ok(text)
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        max_tokens: Option<usize>,
        sink: &TokenSink,
    ) -> Result<String> {
        let response = match self.mode {
            OpenAiMode::Chat => {
                let url = format!("{}/v1/chat/completions", self.base_url);
                self.request_builder(url)
                    .json(&ChatRequest {
                        model: &self.model,
                        messages: vec![Message {
                            role: "user",
                            content: prompt,
                        }],
                        temperature: 0.0,
                        stream: true,
                        max_tokens,
                    })
                    .send()
                    .await
            }
            OpenAiMode::Completion => {
                let url = format!("{}/v1/completions", self.base_url);
                self.request_builder(url)
                    .json(&CompletionRequest {
                        model: &self.model,
                        prompt,
                        temperature: 0.0,
                        stream: true,
                        max_tokens,
                    })
                    .send()
                    .await
            }
        }
        .with_context(|| format!("failed to open generation stream for {}", self.model))?
        .error_for_status()
        .with_context(|| format!("streaming request for {} was rejected", self.model))?;

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut aggregated = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.context("generation stream read error")?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].to_string();
                buffer.drain(..=newline);

                if let Some(token) = parse_stream_line(&line)? {
                    sink.push(&token);
                    aggregated.push_str(&token);
                }
            }
        }

        if let Some(token) = parse_stream_line(buffer.trim())? {
            sink.push(&token);
            aggregated.push_str(&token);
        }

        Ok(aggregated)
    }
}

#[async_trait::async_trait]
impl AnswerEngine for OpenAiEngine {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<SearchOutcome> {
        let context = prompt::headed_context(request.passages);
        let template = format!("{}{}", prompt::date_preamble(), request.prompt_template);
        let input = prompt::assemble(&template, request.question, &context);

        let token_count = prompt::count_tokens(&input);
        tracing::debug!(model = %self.model, token_count, "assembled generation prompt");

        let max_tokens = match self.context_window {
            Some(window) => Some(remaining_budget(window, token_count)?),
            None => None,
        };

        let text = match &request.sink {
            Some(sink) => self.complete_streaming(&input, max_tokens, sink).await?,
            None => self.complete_plain(&input, max_tokens).await?,
        };

        let result = if text.trim().is_empty() {
            NO_COMPLETION_MESSAGE.to_string()
        } else {
            text.trim().to_string()
        };

        Ok(SearchOutcome {
            result,
            input,
            token_count,
        })
    }
}

/// Generation budget for a fixed-window model. Prompts that already fill
/// the window are a configuration problem, reported as such instead of
/// being silently truncated.
fn remaining_budget(window: usize, prompt_tokens: usize) -> Result<usize> {
    if prompt_tokens >= window {
        anyhow::bail!(
            "context overflow: prompt uses {prompt_tokens} tokens of a {window} token window"
        );
    }
    Ok(window - prompt_tokens)
}

/// Parses one server-sent event line. Returns the content delta, `None` for
/// non-data lines, empty deltas and the final `[DONE]` marker, an error for
/// malformed payloads.
fn parse_stream_line(line: &str) -> Result<Option<String>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data: ") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .with_context(|| format!("failed to parse stream chunk: {data}"))?;

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.and_then(|d| d.content).or(choice.text))
        .unwrap_or_default();

    if content.is_empty() {
        Ok(None)
    } else {
        Ok(Some(content))
    }
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<MessageContent>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_delta_lines_yield_their_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Bonjour"}}]}"#;
        assert_eq!(parse_stream_line(line).unwrap().as_deref(), Some("Bonjour"));
    }

    #[test]
    fn completion_text_lines_yield_their_content() {
        let line = r#"data: {"choices":[{"text":"Bonjour"}]}"#;
        assert_eq!(parse_stream_line(line).unwrap().as_deref(), Some("Bonjour"));
    }

    #[test]
    fn done_marker_and_blank_lines_are_skipped() {
        assert!(parse_stream_line("data: [DONE]").unwrap().is_none());
        assert!(parse_stream_line("").unwrap().is_none());
        assert!(parse_stream_line("event: ping").unwrap().is_none());
    }

    #[test]
    fn empty_deltas_are_skipped() {
        let line = r#"data: {"choices":[{"delta":{"content":null}}]}"#;
        assert!(parse_stream_line(line).unwrap().is_none());
        let role_only = r#"data: {"choices":[{"delta":{}}]}"#;
        assert!(parse_stream_line(role_only).unwrap().is_none());
    }

    #[test]
    fn malformed_chunks_are_errors() {
        assert!(parse_stream_line("data: {broken json").is_err());
    }

    #[test]
    fn generation_budget_is_window_minus_prompt() {
        assert_eq!(remaining_budget(4096, 1000).unwrap(), 3096);
    }

    #[test]
    fn full_window_is_a_context_overflow_error() {
        let err = remaining_budget(4096, 4096).expect_err("overflow");
        assert!(err.to_string().contains("context overflow"));
        assert!(remaining_budget(4096, 5000).is_err());
    }
}
