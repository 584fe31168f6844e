use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use guichet::anonymize::Anonymizer;
use guichet::config::AppConfig;
use guichet::db::Database;
use guichet::embedding::EmbeddingClient;
use guichet::engines::EngineRegistry;
use guichet::models::{SearchRequest, DEFAULT_ENGINE};
use guichet::ner::NerClient;
use guichet::qdrant_store::QdrantStore;
use guichet::search::{DocumentSearch, SearchService};
use guichet::stream::SessionRegistry;

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Run one query through retrieval and generation")]
struct Cli {
    /// The question to answer
    query: String,
    /// Generation engine name
    #[arg(long, default_value = DEFAULT_ENGINE)]
    engine: String,
    /// Category slug to search in
    #[arg(long, default_value = "documents")]
    category: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    let db = Database::new(&config).await?;
    let qdrant = QdrantStore::new(config.qdrant_base_url.clone());
    let embedder = EmbeddingClient::new(
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
    );
    let ner = NerClient::new(config.ner.base_url.clone(), config.ner.model.clone());
    let anonymizer = Anonymizer::new(ner, &config.anonymizer);

    let retriever = Arc::new(DocumentSearch::new(
        qdrant,
        embedder,
        config.embedding.query_prefix.clone(),
    ));
    let engines = Arc::new(EngineRegistry::from_config(&config.engines)?);
    let sessions = Arc::new(SessionRegistry::new());

    let search = SearchService::new(
        db,
        anonymizer,
        retriever,
        engines,
        sessions,
        config.score_threshold,
    );

    let outcome = search
        .answer(&SearchRequest {
            query: cli.query,
            category: cli.category,
            engine: cli.engine,
            k: None,
            session_id: None,
        })
        .await?;

    println!("{}", outcome.result);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
