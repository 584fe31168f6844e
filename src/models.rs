use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_K: i64 = 4;
pub const DEFAULT_ENGINE: &str = "gpt-3.5-turbo";

/// Stored for a category created with a blank prompt. `{context}` and
/// `{question}` are substituted at generation time.
pub const DEFAULT_PROMPT: &str = "\
Tu es un assistant du service de gestion des personnels. Réponds à la question \
en t'appuyant uniquement sur les extraits de documents fournis ci-dessous. \
Si la réponse ne se trouve pas dans les extraits, réponds « Je ne sais pas ».\n\n\
Extraits:\n{context}\n\n\
Question: {question}\n\
Réponse:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub prompt: String,
    pub welcome_message: String,
    pub k: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub category_id: i64,
    pub file_path: String,
    pub title: String,
    pub hints: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Display label: the title, or the file name when no title was given.
    pub fn display_title(&self) -> String {
        if self.title.trim().is_empty() {
            self.file_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.file_path)
                .to_string()
        } else {
            self.title.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub id: i64,
    pub category_id: i64,
    pub query: String,
    pub query_hash: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// One indexable unit of text with its provenance. `origin` is the human
/// label shown in answers; `source` identifies the underlying file or
/// correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    pub origin: String,
    pub source: String,
    pub page: Option<i64>,
}

/// A passage returned by similarity search, provenance trailer already
/// appended to its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub content: String,
    pub origin: String,
    pub page: Option<i64>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub result: String,
    pub input: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub category: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncSearchRequest {
    pub callback_url: String,
    pub query: String,
    pub category: String,
    #[serde(default = "default_engine")]
    pub engine: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    #[serde(default)]
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub job_id: String,
    pub status: String,
    pub stage: String,
    pub message: Option<String>,
    pub documents: i64,
    pub corrections: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-category outcome of an indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub category: String,
    pub documents: usize,
    pub corrections: usize,
    pub failed_documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSubmission {
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub mark_as_deleted: bool,
}

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}
