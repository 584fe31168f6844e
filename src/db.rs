use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::AppConfig;
use crate::models::{Category, Correction, Document, DEFAULT_K, DEFAULT_PROMPT};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::open(&config.sqlite_dsn()).await
    }

    pub async fn open(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                prompt TEXT NOT NULL,
                welcome_message TEXT NOT NULL DEFAULT '',
                k INTEGER NOT NULL DEFAULT 4
            );

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                hints TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS corrections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category_id INTEGER NOT NULL,
                query TEXT NOT NULL,
                query_hash TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (category_id, query_hash),
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_category(
        &self,
        name: &str,
        prompt: &str,
        welcome_message: &str,
        k: Option<i64>,
    ) -> Result<Category> {
        let slug = slugify(name);
        let prompt = if prompt.trim().is_empty() {
            DEFAULT_PROMPT
        } else {
            prompt
        };

        let id = sqlx::query(
            "INSERT INTO categories (name, slug, prompt, welcome_message, k) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(&slug)
        .bind(prompt)
        .bind(welcome_message)
        .bind(k.unwrap_or(DEFAULT_K))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create category {name}"))?
        .last_insert_rowid();

        self.category_by_id(id)
            .await?
            .context("category vanished right after insert")
    }

    /// All categories, or just the one with the given id.
    pub async fn categories(&self, category_id: Option<i64>) -> Result<Vec<Category>> {
        let rows = match category_id {
            Some(id) => {
                sqlx::query(
                    "SELECT id, name, slug, prompt, welcome_message, k FROM categories WHERE id = ?",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, name, slug, prompt, welcome_message, k FROM categories ORDER BY name",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(row_to_category).collect())
    }

    pub async fn category_by_id(&self, id: i64) -> Result<Option<Category>> {
        let row = sqlx::query(
            "SELECT id, name, slug, prompt, welcome_message, k FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_category))
    }

    pub async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let row = sqlx::query(
            "SELECT id, name, slug, prompt, welcome_message, k FROM categories WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_category))
    }

    /// Deletes a category; documents and corrections cascade. Returns the
    /// deleted row so the caller can drop the matching vector collection.
    pub async fn delete_category(&self, id: i64) -> Result<Option<Category>> {
        let category = self.category_by_id(id).await?;
        if category.is_some() {
            sqlx::query("DELETE FROM categories WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(category)
    }

    pub async fn create_document(
        &self,
        category_id: i64,
        file_path: &str,
        title: &str,
        hints: &str,
    ) -> Result<Document> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO documents (category_id, file_path, title, hints, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(category_id)
        .bind(file_path)
        .bind(title)
        .bind(hints)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to register document {file_path}"))?
        .last_insert_rowid();

        Ok(Document {
            id,
            category_id,
            file_path: file_path.to_string(),
            title: title.to_string(),
            hints: hints.to_string(),
            created_at: now,
        })
    }

    pub async fn documents_for_category(&self, category_id: i64) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, category_id, file_path, title, hints, created_at FROM documents WHERE category_id = ? ORDER BY id",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    pub async fn corrections_for_category(&self, category_id: i64) -> Result<Vec<Correction>> {
        let rows = sqlx::query(
            "SELECT id, category_id, query, query_hash, answer, created_at FROM corrections WHERE category_id = ? ORDER BY id",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_correction).collect())
    }

    /// Looks a correction up by its normalized query (hash recomputed here,
    /// never trusted from input).
    pub async fn correction_by_query(
        &self,
        category_id: i64,
        query: &str,
    ) -> Result<Option<Correction>> {
        let row = sqlx::query(
            "SELECT id, category_id, query, query_hash, answer, created_at FROM corrections WHERE category_id = ? AND query_hash = ?",
        )
        .bind(category_id)
        .bind(query_hash(query))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_correction))
    }

    /// Plain insert: a second correction for the same (category, query)
    /// violates the unique constraint and surfaces as an error.
    pub async fn insert_correction(
        &self,
        category_id: i64,
        query: &str,
        answer: &str,
    ) -> Result<Correction> {
        let now = Utc::now();
        let hash = query_hash(query);
        let id = sqlx::query(
            "INSERT INTO corrections (category_id, query, query_hash, answer, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(category_id)
        .bind(query)
        .bind(&hash)
        .bind(answer)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("failed to insert correction (duplicate query for this category?)")?
        .last_insert_rowid();

        Ok(Correction {
            id,
            category_id,
            query: query.to_string(),
            query_hash: hash,
            answer: answer.to_string(),
            created_at: now,
        })
    }

    pub async fn update_correction(&self, id: i64, query: &str, answer: &str) -> Result<()> {
        sqlx::query("UPDATE corrections SET query = ?, query_hash = ?, answer = ? WHERE id = ?")
            .bind(query)
            .bind(query_hash(query))
            .bind(answer)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_correction(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM corrections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// URL-safe slug, a pure function of the name: accents folded away, the rest
/// lowercased, non-alphanumeric runs collapsed to single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.nfd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// SHA-256 hex digest of the correction query, the uniqueness key within a
/// category. Recomputed on every save.
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn row_to_category(row: SqliteRow) -> Category {
    Category {
        id: row.get("id"),
        name: row.get("name"),
        slug: row.get("slug"),
        prompt: row.get("prompt"),
        welcome_message: row.get("welcome_message"),
        k: row.get("k"),
    }
}

fn row_to_document(row: SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        category_id: row.get("category_id"),
        file_path: row.get("file_path"),
        title: row.get("title"),
        hints: row.get("hints"),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

fn row_to_correction(row: SqliteRow) -> Correction {
    Correction {
        id: row.get("id"),
        category_id: row.get("category_id"),
        query: row.get("query"),
        query_hash: row.get("query_hash"),
        answer: row.get("answer"),
        created_at: parse_timestamp(row.get("created_at")),
    }
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    // a file-backed database: pooled connections to `sqlite::memory:` would
    // each see their own empty database
    async fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let dsn = format!("sqlite://{}", dir.path().join("test.sqlite3").display());
        let db = Database::open(&dsn).await.expect("open db");
        (dir, db)
    }

    #[test]
    fn slug_is_deterministic_and_accent_free() {
        assert_eq!(slugify("Café du Midi"), "cafe-du-midi");
        assert_eq!(slugify("Café du Midi"), slugify("Café du Midi"));
        assert_eq!(slugify("Mouvement inter-académique"), "mouvement-inter-academique");
        assert_eq!(slugify("  Congés  "), "conges");
    }

    #[test]
    fn query_hash_is_deterministic() {
        let a = query_hash("quand déposer mes congés");
        let b = query_hash("quand déposer mes congés");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, query_hash("autre question"));
    }

    #[tokio::test]
    async fn duplicate_correction_is_rejected() {
        let (_dir, db) = test_db().await;
        let category = db
            .create_category("Documents", "", "", None)
            .await
            .expect("create category");

        db.insert_correction(category.id, "quelle est la règle ?", "la règle est X")
            .await
            .expect("first correction");
        let duplicate = db
            .insert_correction(category.id, "quelle est la règle ?", "autre réponse")
            .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn blank_prompt_gets_the_default_template() {
        let (_dir, db) = test_db().await;
        let category = db
            .create_category("Mobilité", "  ", "Bienvenue", None)
            .await
            .expect("create category");

        assert_eq!(category.prompt, DEFAULT_PROMPT);
        assert_eq!(category.slug, "mobilite");
        assert_eq!(category.k, DEFAULT_K);
    }

    #[tokio::test]
    async fn category_delete_cascades() {
        let (_dir, db) = test_db().await;
        let category = db
            .create_category("Documents", "", "", None)
            .await
            .expect("create category");
        db.create_document(category.id, "documents/guide.pdf", "Guide RH", "")
            .await
            .expect("create document");
        db.insert_correction(category.id, "question", "réponse")
            .await
            .expect("create correction");

        db.delete_category(category.id).await.expect("delete");

        assert!(db
            .documents_for_category(category.id)
            .await
            .expect("documents")
            .is_empty());
        assert!(db
            .corrections_for_category(category.id)
            .await
            .expect("corrections")
            .is_empty());
    }
}
