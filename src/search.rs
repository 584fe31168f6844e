use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use crate::anonymize::Anonymizer;
use crate::db::Database;
use crate::embedding::EmbeddingClient;
use crate::engines::EngineRegistry;
use crate::models::{Category, RetrievedPassage, SearchOutcome, SearchRequest};
use crate::qdrant_store::{QdrantStore, ScoredPoint};
use crate::stream::{SessionRegistry, TokenSink};

/// Domain abbreviations expanded in retrieval queries so the embedding sees
/// both the acronym and its meaning.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("sft", "supplément familial de traitement"),
    ("iff", "indemnité forfaitaire de formation"),
];

/// Similarity search against a category's vector collection.
pub struct DocumentSearch {
    qdrant: QdrantStore,
    embedder: EmbeddingClient,
    query_prefix: String,
}

impl DocumentSearch {
    pub fn new(qdrant: QdrantStore, embedder: EmbeddingClient, query_prefix: String) -> Self {
        Self {
            qdrant,
            embedder,
            query_prefix,
        }
    }

    /// The `k` nearest passages that clear the threshold, most similar
    /// first, each annotated with a provenance trailer. An empty result is
    /// not an error: it tells the caller no grounding is available.
    pub async fn relevant_passages(
        &self,
        category: &Category,
        query: &str,
        k: Option<usize>,
        threshold: f32,
    ) -> Result<Vec<RetrievedPassage>> {
        let normalized = normalize_query(query, &self.query_prefix);
        let embedding = self.embedder.embed(&normalized).await?;
        let k = k.unwrap_or(category.k.max(1) as usize);

        let hits = self.qdrant.search(&category.slug, &embedding, k).await?;
        Ok(filter_and_annotate(hits, threshold))
    }
}

/// Lowercases the query and expands known abbreviations into
/// `abbr (full form)` on word boundaries, then applies the embedding
/// model's query prefix. Used for retrieval only; the displayed and
/// generated-over question keeps its original casing.
pub fn normalize_query(query: &str, prefix: &str) -> String {
    let mut query = query.to_lowercase();
    for (abbr, full_form) in ABBREVIATIONS {
        let re = Regex::new(&format!(r"\b{abbr}\b")).unwrap_or_else(|_| Regex::new("^$").unwrap());
        query = re
            .replace_all(&query, format!("{abbr} ({full_form})").as_str())
            .into_owned();
    }
    format!("{prefix}{query}")
}

/// Scores below the threshold are dropped (cosine similarity, higher is
/// better); surviving passages get a trailer naming source, page and score
/// so the generation step and any debugging can see what grounded them.
pub fn filter_and_annotate(hits: Vec<ScoredPoint>, threshold: f32) -> Vec<RetrievedPassage> {
    hits.into_iter()
        .filter(|hit| hit.score >= threshold)
        .map(|hit| {
            let page = hit.page.map(|p| p.to_string()).unwrap_or_default();
            RetrievedPassage {
                content: format!(
                    "{}\nsource: {} - page {} - score {}\n",
                    hit.content, hit.origin, page, hit.score
                ),
                origin: hit.origin,
                page: hit.page,
                score: hit.score,
            }
        })
        .collect()
}

/// The full query-side pipeline: anonymize, retrieve, dispatch to the
/// requested engine.
#[derive(Clone)]
pub struct SearchService {
    db: Database,
    anonymizer: Anonymizer,
    retriever: Arc<DocumentSearch>,
    engines: Arc<EngineRegistry>,
    sessions: Arc<SessionRegistry>,
    score_threshold: f32,
}

impl SearchService {
    pub fn new(
        db: Database,
        anonymizer: Anonymizer,
        retriever: Arc<DocumentSearch>,
        engines: Arc<EngineRegistry>,
        sessions: Arc<SessionRegistry>,
        score_threshold: f32,
    ) -> Self {
        Self {
            db,
            anonymizer,
            retriever,
            engines,
            sessions,
            score_threshold,
        }
    }

    pub async fn answer(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let query = self.anonymizer.anonymize(&request.query).await?;

        let category = self
            .db
            .category_by_slug(&request.category)
            .await?
            .with_context(|| format!("unknown category: {}", request.category))?;

        let passages = self
            .retriever
            .relevant_passages(&category, &query, request.k, self.score_threshold)
            .await?;

        if passages.is_empty() {
            tracing::info!(
                category = %category.slug,
                "no passage cleared the threshold; answering without grounding"
            );
        }

        let sink = request
            .session_id
            .as_ref()
            .map(|id| TokenSink::new(id.clone(), self.sessions.clone()));

        self.engines
            .generate(&request.engine, &category.prompt, &query, &passages, sink)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(content: &str, score: f32) -> ScoredPoint {
        ScoredPoint {
            content: content.to_string(),
            origin: "Guide RH".to_string(),
            page: Some(3),
            score,
        }
    }

    #[test]
    fn normalization_lowercases_and_expands_abbreviations() {
        let normalized = normalize_query("Ai-je droit au SFT cette année ?", "");
        assert_eq!(
            normalized,
            "ai-je droit au sft (supplément familial de traitement) cette année ?"
        );
    }

    #[test]
    fn normalization_ignores_abbreviations_inside_words() {
        assert_eq!(normalize_query("transfert", ""), "transfert");
    }

    #[test]
    fn normalization_applies_the_query_prefix() {
        assert_eq!(normalize_query("congés", "query: "), "query: congés");
    }

    #[test]
    fn passages_below_the_threshold_are_dropped() {
        let hits = vec![hit("a", 0.9), hit("b", 0.19), hit("c", 0.25)];
        let kept = filter_and_annotate(hits, 0.20);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|p| p.score >= 0.20));
    }

    #[test]
    fn raising_the_threshold_never_returns_more_passages() {
        let hits = vec![hit("a", 0.9), hit("b", 0.5), hit("c", 0.25), hit("d", 0.1)];
        let mut previous = usize::MAX;
        for threshold in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let count = filter_and_annotate(hits.clone(), threshold).len();
            assert!(count <= previous);
            previous = count;
        }
    }

    #[test]
    fn surviving_passages_carry_a_provenance_trailer() {
        let hits = vec![hit("Les congés sont à déposer avant le 15.", 0.83)];
        let kept = filter_and_annotate(hits, 0.0);
        assert_eq!(
            kept[0].content,
            "Les congés sont à déposer avant le 15.\nsource: Guide RH - page 3 - score 0.83\n"
        );
    }

    #[test]
    fn annotated_passages_flow_into_the_assembled_prompt() {
        let hits = vec![hit("Les congés sont à déposer avant le 15.", 0.83)];
        let passages = filter_and_annotate(hits, 0.0);

        let context = crate::prompt::headed_context(&passages);
        let assembled = crate::prompt::assemble(
            "Contexte:\n{context}\nQuestion: {question}",
            "quand déposer mes congés",
            &context,
        );

        assert!(assembled.contains("Les congés sont à déposer avant le 15."));
        assert!(assembled.contains("source: Guide RH - page 3 - score 0.83"));
        assert!(assembled.contains("Question: quand déposer mes congés"));
    }

    #[test]
    fn missing_pages_leave_the_trailer_slot_empty() {
        let mut point = hit("texte", 0.5);
        point.page = None;
        let kept = filter_and_annotate(vec![point], 0.0);
        assert!(kept[0].content.contains("source: Guide RH - page  - score 0.5"));
    }
}
