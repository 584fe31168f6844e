use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::SearchOutcome;
use crate::prompt;

use super::{AnswerEngine, GenerationRequest, NO_COMPLETION_MESSAGE};

/// Vertex AI backend, reached through a fully configured generateContent
/// endpoint with a pre-issued access token.
pub struct VertexEngine {
    client: Client,
    endpoint: String,
    token: String,
}

impl VertexEngine {
    pub fn new(client: Client, endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl AnswerEngine for VertexEngine {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<SearchOutcome> {
        if self.endpoint.is_empty() {
            anyhow::bail!("vertex endpoint is not configured");
        }

        let context = prompt::delimited_context(request.passages);
        let input = prompt::assemble(request.prompt_template, request.question, &context);
        let token_count = prompt::count_tokens(&input);
        tracing::debug!(token_count, "assembled generation prompt");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&GenerateRequest {
                contents: vec![Content {
                    role: "user",
                    parts: vec![Part { text: &input }],
                }],
            })
            .send()
            .await
            .context("failed to call the vertex endpoint")?
            .error_for_status()
            .context("vertex endpoint rejected the request")?
            .json::<GenerateResponse>()
            .await
            .context("failed to decode vertex response")?;

        let result = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| NO_COMPLETION_MESSAGE.to_string());

        Ok(SearchOutcome {
            result,
            input,
            token_count,
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}
