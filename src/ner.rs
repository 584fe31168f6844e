use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Label the recognizer puts on person-name spans.
pub const PERSON_LABEL: &str = "PER";

#[derive(Debug, Clone, Deserialize)]
pub struct NamedEntity {
    #[serde(rename = "entity_group")]
    pub label: String,
    #[serde(rename = "word")]
    pub text: String,
}

/// Client for the token-classification inference service hosting the NER
/// model. The service exposes the usual `POST /models/<model>` route taking
/// `{"inputs": ...}` and answering with aggregated entity groups.
#[derive(Clone)]
pub struct NerClient {
    client: Client,
    base_url: String,
    model: String,
}

impl NerClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub async fn find_entities(&self, text: &str) -> Result<Vec<NamedEntity>> {
        #[derive(Serialize)]
        struct NerRequest<'a> {
            inputs: &'a str,
        }

        let url = format!("{}/models/{}", self.base_url, self.model);
        let response = self
            .client
            .post(url)
            .json(&NerRequest { inputs: text })
            .send()
            .await
            .context("failed to call the entity recognition service")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("entity recognition service returned {status}: {}", body.trim());
        }

        response
            .json::<Vec<NamedEntity>>()
            .await
            .context("failed to decode entity recognition response")
    }
}
