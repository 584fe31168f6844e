use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;
use uuid::Uuid;

use crate::chunk;
use crate::config::SplitConfig;
use crate::db::Database;
use crate::embedding::EmbeddingClient;
use crate::hints::{parse_hints, PageHints};
use crate::models::{Category, Correction, Document, IndexReport, Passage};
use crate::qdrant_store::{QdrantPayload, QdrantPoint, QdrantStore};
use crate::storage::BlobStorage;

const UPSERT_BATCH: usize = 64;

/// Rebuilds vector collections from the curated corpus. A reindex is
/// authoritative: the category's collection is dropped and recreated from
/// scratch, never merged into.
pub struct Indexer {
    db: Database,
    storage: Arc<dyn BlobStorage>,
    embedder: EmbeddingClient,
    qdrant: QdrantStore,
    split: SplitConfig,
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Indexer {
    pub fn new(
        db: Database,
        storage: Arc<dyn BlobStorage>,
        embedder: EmbeddingClient,
        qdrant: QdrantStore,
        split: SplitConfig,
    ) -> Self {
        Self {
            db,
            storage,
            embedder,
            qdrant,
            split,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Indexes one category, or every category when no id is given. A
    /// category failing partway does not stop the others; the failures are
    /// reported together at the end.
    pub async fn index(&self, category_id: Option<i64>) -> Result<Vec<IndexReport>> {
        let categories = self.db.categories(category_id).await?;
        if categories.is_empty() {
            if let Some(id) = category_id {
                anyhow::bail!("no category with id {id}");
            }
            return Ok(vec![]);
        }

        let mut reports = Vec::new();
        let mut failures = Vec::new();

        for category in &categories {
            // Two rebuilds of the same collection interleaving their
            // delete-then-populate sequences would lose data.
            let lock = self.category_lock(category.id);
            let _guard = lock.lock().await;

            match self.index_category(category).await {
                Ok(report) => {
                    tracing::info!(
                        "Successfully indexed {} document(s) and {} correction(s) for category {}",
                        report.documents,
                        report.corrections,
                        category.name
                    );
                    reports.push(report);
                }
                Err(err) => {
                    tracing::error!("indexing category {} failed: {err:#}", category.name);
                    failures.push(format!("{}: {err:#}", category.name));
                }
            }
        }

        if !failures.is_empty() {
            anyhow::bail!(
                "indexing failed for {} of {} categories: {}",
                failures.len(),
                categories.len(),
                failures.join("; ")
            );
        }

        tracing::info!("Successfully indexed all documents");
        Ok(reports)
    }

    async fn index_category(&self, category: &Category) -> Result<IndexReport> {
        let documents = self.db.documents_for_category(category.id).await?;
        let corrections = self.db.corrections_for_category(category.id).await?;

        let mut passages: Vec<Passage> = Vec::new();
        let mut failed_documents = Vec::new();
        let mut indexed_documents = 0usize;

        for document in &documents {
            match self.document_passages(document).await {
                Ok(mut document_passages) => {
                    indexed_documents += 1;
                    passages.append(&mut document_passages);
                }
                Err(err) => {
                    tracing::warn!(
                        "skipping document {}: {err:#}",
                        document.display_title()
                    );
                    failed_documents.push(document.display_title());
                }
            }
        }

        for correction in &corrections {
            passages.push(correction_passage(correction));
        }

        self.submit(category, &passages).await?;

        Ok(IndexReport {
            category: category.name.clone(),
            documents: indexed_documents,
            corrections: corrections.len(),
            failed_documents,
        })
    }

    async fn document_passages(&self, document: &Document) -> Result<Vec<Passage>> {
        let bytes = self.storage.open(&document.file_path).await?;
        let origin = document.display_title();
        let hints = parse_hints(&document.hints);

        tracing::info!("Loading: {origin}");

        let passages = match file_extension(&document.file_path).as_str() {
            "pdf" => self.pdf_passages(&bytes, document, &origin, &hints).await?,
            "md" => markdown_passages(&bytes, document, &origin),
            other => anyhow::bail!("unsupported document type: .{other}"),
        };

        tracing::info!("Successfully loaded document: {origin}");
        Ok(passages)
    }

    async fn pdf_passages(
        &self,
        bytes: &[u8],
        document: &Document,
        origin: &str,
        hints: &PageHints,
    ) -> Result<Vec<Passage>> {
        let temp = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .context("failed to create a scratch file for PDF extraction")?;
        std::fs::write(temp.path(), bytes)
            .context("failed to write PDF bytes to the scratch file")?;

        let pages = extract_pdf_pages(temp.path()).await?;

        let mut passages = Vec::new();
        for (page, raw_text) in pages {
            let cleaned = chunk::clean_text(&raw_text, true);
            for content in chunk::split_flat(&cleaned, self.split.chunk_size, self.split.chunk_overlap)
            {
                passages.push(Passage {
                    content: with_hints(content, hints, page),
                    origin: origin.to_string(),
                    source: document.file_path.clone(),
                    page,
                });
            }
        }

        Ok(passages)
    }

    /// Full replacement of the category's collection. Embeddings are
    /// computed first so the delete window stays as short as possible;
    /// point submission happens in batches but reads as one atomic rebuild
    /// from the caller's side.
    async fn submit(&self, category: &Category, passages: &[Passage]) -> Result<()> {
        if passages.is_empty() {
            tracing::warn!(category = %category.slug, "nothing to index; dropping the collection");
            self.qdrant.delete_collection(&category.slug).await;
            return Ok(());
        }

        let mut points = Vec::with_capacity(passages.len());
        for passage in passages {
            let embedding = self
                .embedder
                .embed(&passage.content)
                .await
                .with_context(|| format!("failed embedding a passage from {}", passage.origin))?;

            points.push(QdrantPoint {
                id: Uuid::new_v4().to_string(),
                vector: embedding,
                payload: QdrantPayload {
                    content: passage.content.clone(),
                    origin: passage.origin.clone(),
                    source: passage.source.clone(),
                    page: passage.page,
                },
            });
        }

        let vector_size = points[0].vector.len();
        self.qdrant
            .recreate_collection(&category.slug, vector_size)
            .await?;

        let mut start = 0;
        while start < points.len() {
            let end = (start + UPSERT_BATCH).min(points.len());
            self.qdrant
                .upsert_points(&category.slug, &points[start..end])
                .await?;
            start = end;
        }

        Ok(())
    }

    fn category_lock(&self, category_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(category_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn markdown_passages(bytes: &[u8], document: &Document, origin: &str) -> Vec<Passage> {
    let text = String::from_utf8_lossy(bytes);
    let cleaned = chunk::clean_text(&text, false);

    chunk::split_markdown(&cleaned)
        .into_iter()
        .map(|content| Passage {
            content,
            origin: origin.to_string(),
            source: document.file_path.clone(),
            page: None,
        })
        .collect()
}

/// Corrections are re-synthesized into pseudo-documents at every reindex so
/// a curated answer always outweighs whatever the source documents say.
fn correction_passage(correction: &Correction) -> Passage {
    Passage {
        content: format!(
            "Question: {}\nRéponse: {}",
            correction.query, correction.answer
        ),
        origin: "correction manuelle".to_string(),
        source: format!("correction-{}", correction.id),
        page: Some(1),
    }
}

fn with_hints(content: String, hints: &PageHints, page: Option<i64>) -> String {
    let extra = hints.for_page(page);
    if extra.is_empty() {
        content
    } else {
        format!("{content}\n{}", extra.join("\n"))
    }
}

fn file_extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Page-by-page text extraction via poppler when available, falling back to
/// in-process extraction without page numbers.
async fn extract_pdf_pages(pdf_path: &Path) -> Result<Vec<(Option<i64>, String)>> {
    if has_command("pdftotext").await {
        let page_count = pdf_page_count(pdf_path).await.unwrap_or(0);
        let mut pages = Vec::new();

        for page in 1..=page_count {
            let output = Command::new("pdftotext")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-layout")
                .arg("-nopgbrk")
                .arg(pdf_path)
                .arg("-")
                .output()
                .await
                .with_context(|| format!("failed to run pdftotext for page {page}"))?;

            if !output.status.success() {
                continue;
            }

            let text = String::from_utf8_lossy(&output.stdout).to_string();
            if text.trim().is_empty() {
                continue;
            }
            pages.push((Some(page as i64), text));
        }

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    let pdf_path = pdf_path.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&pdf_path))
        .await
        .context("PDF extraction task panicked")?
        .context("failed to extract text from PDF")?;

    if extracted.trim().is_empty() {
        anyhow::bail!("PDF produced no extractable text");
    }
    Ok(vec![(None, extracted)])
}

async fn pdf_page_count(pdf_path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        anyhow::bail!("pdfinfo exited with non-zero status");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$")?;
    regex
        .captures(&stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("unable to parse page count from pdfinfo"))
}

async fn has_command(binary: &str) -> bool {
    // Some poppler binaries return non-zero for --version, so check PATH
    // presence via `which` instead of probing a specific flag.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn document(file_path: &str, title: &str, hints: &str) -> Document {
        Document {
            id: 1,
            category_id: 1,
            file_path: file_path.to_string(),
            title: title.to_string(),
            hints: hints.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn corrections_become_question_answer_passages() {
        let correction = Correction {
            id: 7,
            category_id: 1,
            query: "quand déposer mes congés ?".to_string(),
            query_hash: "hash".to_string(),
            answer: "avant le 15".to_string(),
            created_at: Utc::now(),
        };

        let passage = correction_passage(&correction);
        assert_eq!(
            passage.content,
            "Question: quand déposer mes congés ?\nRéponse: avant le 15"
        );
        assert_eq!(passage.origin, "correction manuelle");
        assert_eq!(passage.source, "correction-7");
        assert_eq!(passage.page, Some(1));
    }

    #[test]
    fn markdown_documents_keep_breadcrumb_passages() {
        let doc = document("documents/guide.md", "Guide mobilité", "");
        let passages = markdown_passages(b"# Titre\ncorps du texte", &doc, "Guide mobilité");

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].content, "Titre\ncorps du texte");
        assert_eq!(passages[0].origin, "Guide mobilité");
        assert_eq!(passages[0].page, None);
    }

    #[test]
    fn hints_are_appended_to_matching_pages() {
        let hints = parse_hints("page 2 : précision;toutes pages: rappel");
        assert_eq!(
            with_hints("contenu".to_string(), &hints, Some(2)),
            "contenu\nrappel\nprécision"
        );
        assert_eq!(
            with_hints("contenu".to_string(), &hints, Some(3)),
            "contenu\nrappel"
        );
    }

    #[test]
    fn extension_dispatch_is_case_insensitive() {
        assert_eq!(file_extension("a/b/Guide.PDF"), "pdf");
        assert_eq!(file_extension("notes.md"), "md");
        assert_eq!(file_extension("sans-extension"), "");
    }
}
