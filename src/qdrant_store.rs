use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

/// One point scored by a similarity search, with the payload stored at
/// index time.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub content: String,
    pub origin: String,
    pub page: Option<i64>,
    pub score: f32,
}

/// HTTP client for the vector collection service. Collections are named
/// after category slugs; each category owns exactly one.
#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    known_vector_sizes: Arc<RwLock<HashMap<String, usize>>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            known_vector_sizes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace semantics for reindexing: drop whatever the collection holds,
    /// then create it afresh for the given vector size.
    pub async fn recreate_collection(&self, collection: &str, vector_size: usize) -> Result<()> {
        self.delete_collection(collection).await;
        self.ensure_collection(collection, vector_size).await
    }

    /// Best-effort delete; a missing collection is not an error.
    pub async fn delete_collection(&self, collection: &str) {
        let url = format!("{}/collections/{}", self.base_url, collection);
        let _ = self.client.delete(&url).send().await;
        self.known_vector_sizes.write().await.remove(collection);
    }

    async fn ensure_collection(&self, collection: &str, vector_size: usize) -> Result<()> {
        {
            let known = self.known_vector_sizes.read().await;
            if known.get(collection) == Some(&vector_size) {
                return Ok(());
            }
        }

        let url = format!("{}/collections/{}", self.base_url, collection);
        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        self.client
            .put(url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to contact qdrant while creating {collection}"))?
            .error_for_status()
            .with_context(|| format!("qdrant failed to create collection {collection}"))?;

        self.known_vector_sizes
            .write()
            .await
            .insert(collection.to_string(), vector_size);
        Ok(())
    }

    pub async fn upsert_points(&self, collection: &str, points: &[QdrantPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let vector_size = points[0].vector.len();
        self.ensure_collection(collection, vector_size).await?;

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, collection
        );
        let body = json!({ "points": points });

        self.client
            .put(url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to contact qdrant during upsert into {collection}"))?
            .error_for_status()
            .with_context(|| format!("qdrant upsert into {collection} returned non-success"))?;

        Ok(())
    }

    /// Nearest neighbors by cosine similarity: scores come back in [-1, 1],
    /// higher meaning more similar, ranked most-similar first.
    pub async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        if vector.is_empty() {
            return Ok(vec![]);
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, collection
        );

        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to contact qdrant during search in {collection}"))?
            .error_for_status()
            .with_context(|| format!("qdrant search in {collection} returned non-success"))?
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(ScoredPoint {
                    content: payload.content,
                    origin: payload.origin,
                    page: payload.page,
                    score: point.score,
                })
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantPayload {
    pub content: String,
    pub origin: String,
    pub source: String,
    pub page: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}
