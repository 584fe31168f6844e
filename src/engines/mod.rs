pub mod openai;
pub mod paradigm;
pub mod textsynth;
pub mod vertex;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::EngineConfig;
use crate::models::{RetrievedPassage, SearchOutcome};
use crate::stream::TokenSink;

use openai::OpenAiEngine;
use paradigm::ParadigmEngine;
use textsynth::TextSynthEngine;
use vertex::VertexEngine;

/// Returned verbatim when a provider reports zero completions; an empty
/// provider answer is a result, not an error.
pub const NO_COMPLETION_MESSAGE: &str = "no completion found";

pub struct GenerationRequest<'a> {
    pub prompt_template: &'a str,
    pub question: &'a str,
    pub passages: &'a [RetrievedPassage],
    pub sink: Option<TokenSink>,
}

/// Capability interface over generation backends. Each implementation
/// assembles its own prompt (separators and stop sequences differ between
/// providers) and normalizes the provider response into a `SearchOutcome`.
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<SearchOutcome>;
}

/// Name → backend registry. The engine set is open: unknown names route to
/// the default backend instead of failing.
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn AnswerEngine>>,
    default: Arc<dyn AnswerEngine>,
}

impl EngineRegistry {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build the engine HTTP client")?;

        let default: Arc<dyn AnswerEngine> = Arc::new(OpenAiEngine::chat(
            client.clone(),
            &config.openai_base_url,
            &config.openai_api_key,
            "gpt-3.5-turbo",
        ));

        let mut engines: HashMap<String, Arc<dyn AnswerEngine>> = HashMap::new();
        engines.insert("gpt-3.5-turbo".to_string(), default.clone());
        engines.insert(
            "gpt-4".to_string(),
            Arc::new(OpenAiEngine::chat(
                client.clone(),
                &config.openai_base_url,
                &config.openai_api_key,
                "gpt-4",
            )),
        );
        engines.insert(
            "gpt-3.5-turbo-instruct".to_string(),
            Arc::new(OpenAiEngine::completion(
                client.clone(),
                &config.openai_base_url,
                &config.openai_api_key,
                "gpt-3.5-turbo-instruct",
                4_096,
            )),
        );
        engines.insert(
            "falcon".to_string(),
            Arc::new(TextSynthEngine::new(
                client.clone(),
                &config.textsynth_base_url,
                &config.textsynth_api_key,
                "falcon_40B-chat",
                None,
            )),
        );
        engines.insert(
            "mistral_instruct".to_string(),
            Arc::new(TextSynthEngine::new(
                client.clone(),
                &config.textsynth_base_url,
                &config.textsynth_api_key,
                "mistral_7B_instruct",
                Some("\nQ:".to_string()),
            )),
        );
        engines.insert(
            "paradigm".to_string(),
            Arc::new(ParadigmEngine::new(
                client.clone(),
                &config.paradigm_host,
                &config.paradigm_model,
            )),
        );
        engines.insert(
            "vertexai".to_string(),
            Arc::new(VertexEngine::new(
                client.clone(),
                &config.vertex_endpoint,
                &config.vertex_token,
            )),
        );
        engines.insert(
            "fastchat".to_string(),
            Arc::new(OpenAiEngine::chat(
                client,
                &config.fastchat_base_url,
                "",
                &config.fastchat_model,
            )),
        );

        Ok(Self { engines, default })
    }

    pub fn resolve(&self, name: &str) -> Arc<dyn AnswerEngine> {
        self.engines
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    pub async fn generate(
        &self,
        engine: &str,
        prompt_template: &str,
        question: &str,
        passages: &[RetrievedPassage],
        sink: Option<TokenSink>,
    ) -> Result<SearchOutcome> {
        self.resolve(engine)
            .generate(GenerationRequest {
                prompt_template,
                question,
                passages,
                sink,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EngineConfig {
        EngineConfig {
            openai_base_url: "http://127.0.0.1:1".to_string(),
            openai_api_key: String::new(),
            textsynth_base_url: "http://127.0.0.1:1".to_string(),
            textsynth_api_key: String::new(),
            paradigm_host: "http://127.0.0.1:1".to_string(),
            paradigm_model: "alfred-40b-0723".to_string(),
            vertex_endpoint: String::new(),
            vertex_token: String::new(),
            fastchat_base_url: "http://127.0.0.1:1".to_string(),
            fastchat_model: "fastchat-t5-3b-v1.0".to_string(),
            request_timeout_secs: 1,
        }
    }

    #[test]
    fn unknown_engine_names_fall_back_to_the_default() {
        let registry = EngineRegistry::from_config(&test_config()).expect("registry");
        let fallback = registry.resolve("definitely-not-registered");
        let default = registry.resolve("gpt-3.5-turbo");
        assert!(Arc::ptr_eq(&fallback, &default));
    }

    #[test]
    fn every_known_engine_name_is_registered() {
        let registry = EngineRegistry::from_config(&test_config()).expect("registry");
        for name in [
            "gpt-3.5-turbo",
            "gpt-3.5-turbo-instruct",
            "gpt-4",
            "mistral_instruct",
            "falcon",
            "paradigm",
            "vertexai",
            "fastchat",
        ] {
            assert!(registry.engines.contains_key(name), "{name} missing");
        }
    }
}
