use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use guichet::config::AppConfig;
use guichet::db::Database;
use guichet::embedding::EmbeddingClient;
use guichet::index::Indexer;
use guichet::qdrant_store::QdrantStore;
use guichet::storage::LocalStorage;

#[derive(Parser, Debug)]
#[command(name = "index")]
#[command(about = "Rebuild the vector collections from the stored documents and corrections")]
struct Cli {
    /// Restrict the rebuild to one category
    #[arg(long)]
    category_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let db = Database::new(&config).await?;
    let qdrant = QdrantStore::new(config.qdrant_base_url.clone());
    let embedder = EmbeddingClient::new(
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
    );
    let storage = Arc::new(LocalStorage::new(config.data_dir.clone()));

    let indexer = Indexer::new(db, storage, embedder, qdrant, config.split.clone());
    let reports = indexer.index(cli.category_id).await?;

    for report in reports {
        println!(
            "{}: {} document(s), {} correction(s){}",
            report.category,
            report.documents,
            report.corrections,
            if report.failed_documents.is_empty() {
                String::new()
            } else {
                format!(" (failed: {})", report.failed_documents.join(", "))
            }
        );
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
