use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Read-side abstraction over the uploaded-document store. Indexing only
/// ever reads bytes; writes happen in the upload layer, outside this crate's
/// pipeline.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn open(&self, path: &str) -> Result<Vec<u8>>;
    async fn exists(&self, path: &str) -> bool;
}

/// Local filesystem store rooted at the configured data directory.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn open(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("failed to read stored file {}", full.display()))
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_files_under_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("a.md"), b"# Titre\ncorps")
            .await
            .expect("write");

        let storage = LocalStorage::new(dir.path().to_path_buf());
        assert!(storage.exists("a.md").await);
        assert!(!storage.exists("missing.md").await);

        let bytes = storage.open("a.md").await.expect("open");
        assert_eq!(bytes, b"# Titre\ncorps");
    }
}
