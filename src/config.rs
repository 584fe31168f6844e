use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    /// Prefix some embedding models expect on retrieval queries ("query: "
    /// for e5-style models). Empty by default.
    pub query_prefix: String,
}

#[derive(Clone, Debug)]
pub struct NerConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct AnonymizerConfig {
    pub entity_capacity: usize,
    pub false_positive_rate: f64,
}

#[derive(Clone, Debug)]
pub struct SplitConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub textsynth_base_url: String,
    pub textsynth_api_key: String,
    pub paradigm_host: String,
    pub paradigm_model: String,
    pub vertex_endpoint: String,
    pub vertex_token: String,
    pub fastchat_base_url: String,
    pub fastchat_model: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CallbackConfig {
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub qdrant_base_url: String,
    pub embedding: EmbeddingConfig,
    pub ner: NerConfig,
    pub anonymizer: AnonymizerConfig,
    pub split: SplitConfig,
    pub engines: EngineConfig,
    pub callback: CallbackConfig,
    pub score_threshold: f32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("GUICHET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("GUICHET_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            data_dir,
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            embedding: EmbeddingConfig {
                base_url: env::var("EMBEDDING_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
                model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "intfloat/multilingual-e5-large".to_string()),
                query_prefix: env::var("EMBEDDING_QUERY_PREFIX").unwrap_or_default(),
            },
            ner: NerConfig {
                base_url: env::var("NER_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
                model: env::var("NER_MODEL")
                    .unwrap_or_else(|_| "Jean-Baptiste/camembert-ner-with-dates".to_string()),
            },
            anonymizer: AnonymizerConfig {
                entity_capacity: env::var("ANONYMIZER_CAPACITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1_000_000),
                false_positive_rate: env::var("ANONYMIZER_ERROR_RATE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.1),
            },
            split: SplitConfig {
                chunk_size: env::var("SPLIT_CHUNK_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
                chunk_overlap: env::var("SPLIT_CHUNK_OVERLAP")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(80),
            },
            engines: EngineConfig {
                openai_base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                textsynth_base_url: env::var("TEXT_SYNTH_BASE_URL")
                    .unwrap_or_else(|_| "https://api.textsynth.com".to_string()),
                textsynth_api_key: env::var("TEXT_SYNTH_API_KEY").unwrap_or_default(),
                paradigm_host: env::var("PARADIGM_HOST")
                    .unwrap_or_else(|_| "http://127.0.0.1:8480".to_string()),
                paradigm_model: env::var("PARADIGM_MODEL")
                    .unwrap_or_else(|_| "alfred-40b-0723".to_string()),
                vertex_endpoint: env::var("VERTEX_ENDPOINT").unwrap_or_default(),
                vertex_token: env::var("VERTEX_TOKEN").unwrap_or_default(),
                fastchat_base_url: env::var("FASTCHAT_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
                fastchat_model: env::var("FASTCHAT_MODEL")
                    .unwrap_or_else(|_| "fastchat-t5-3b-v1.0".to_string()),
                request_timeout_secs: env::var("ENGINE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            },
            callback: CallbackConfig {
                username: env::var("CALLBACK_USERNAME").unwrap_or_default(),
                password: env::var("CALLBACK_PASSWORD").unwrap_or_default(),
                timeout_secs: env::var("CALLBACK_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3_600),
            },
            score_threshold: env::var("SCORE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.20),
        }
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir.join("documents")
    }

    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.data_dir.join("guichet.sqlite3").display()
        )
    }
}
