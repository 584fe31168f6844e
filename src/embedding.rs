use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Client for the embedding provider. The same model serves index-time
/// passages and query-time questions; mixing versions silently degrades
/// retrieval, so there is exactly one client configuration for both.
#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = text.trim();
        if input.is_empty() {
            anyhow::bail!("cannot embed empty text input");
        }

        // Newer servers expose /api/embed, older ones /api/embeddings. Try
        // the new route first and fall back for compatibility.
        match self.embed_modern(input).await {
            Ok(vector) => Ok(vector),
            Err(modern_err) => match self.embed_legacy(input).await {
                Ok(vector) => Ok(vector),
                Err(legacy_err) => Err(anyhow::anyhow!(
                    "embedding failed via /api/embed and /api/embeddings. \
                     modern error: {modern_err}; legacy error: {legacy_err}; \
                     ensure the embedding model {} is available",
                    self.model
                )),
            },
        }
    }

    async fn embed_modern(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbedReq<'a> {
            model: &'a str,
            input: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbedResp {
            embeddings: Vec<Vec<f32>>,
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbedReq {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .context("failed to call embedding endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("/api/embed returned {status}: {}", body.trim());
        }

        let response = response
            .json::<EmbedResp>()
            .await
            .context("failed to decode /api/embed response")?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("/api/embed returned an empty embeddings array"))
    }

    async fn embed_legacy(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct EmbeddingReq<'a> {
            model: &'a str,
            prompt: &'a str,
        }

        #[derive(Deserialize)]
        struct EmbeddingResp {
            embedding: Vec<f32>,
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(url)
            .json(&EmbeddingReq {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .context("failed to call legacy embeddings endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("/api/embeddings returned {status}: {}", body.trim());
        }

        let response = response
            .json::<EmbeddingResp>()
            .await
            .context("failed to decode legacy embeddings response")?;

        Ok(response.embedding)
    }
}
