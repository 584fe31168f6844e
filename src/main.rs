use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use guichet::anonymize::Anonymizer;
use guichet::db::Database;
use guichet::embedding::EmbeddingClient;
use guichet::engines::EngineRegistry;
use guichet::index::Indexer;
use guichet::ner::NerClient;
use guichet::qdrant_store::QdrantStore;
use guichet::search::{DocumentSearch, SearchService};
use guichet::storage::LocalStorage;
use guichet::stream::SessionRegistry;
use guichet::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let db = Database::new(&config).await?;
    let qdrant = QdrantStore::new(config.qdrant_base_url.clone());
    let embedder = EmbeddingClient::new(
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
    );
    let ner = NerClient::new(config.ner.base_url.clone(), config.ner.model.clone());
    let anonymizer = Anonymizer::new(ner, &config.anonymizer);

    let storage = Arc::new(LocalStorage::new(config.data_dir.clone()));
    let indexer = Arc::new(Indexer::new(
        db.clone(),
        storage,
        embedder.clone(),
        qdrant.clone(),
        config.split.clone(),
    ));

    let retriever = Arc::new(DocumentSearch::new(
        qdrant.clone(),
        embedder,
        config.embedding.query_prefix.clone(),
    ));

    let engines = Arc::new(EngineRegistry::from_config(&config.engines)?);
    let sessions = Arc::new(SessionRegistry::new());

    let search = SearchService::new(
        db.clone(),
        anonymizer,
        retriever,
        engines,
        sessions.clone(),
        config.score_threshold,
    );

    run_server(config, db, search, indexer, qdrant, sessions).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
