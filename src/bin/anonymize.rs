use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use guichet::anonymize::Anonymizer;
use guichet::config::AppConfig;
use guichet::ner::NerClient;

#[derive(Parser, Debug)]
#[command(name = "anonymize")]
#[command(about = "Anonymize a text and print the redacted version")]
struct Cli {
    /// The text to anonymize
    query: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    let ner = NerClient::new(config.ner.base_url.clone(), config.ner.model.clone());
    let anonymizer = Anonymizer::new(ner, &config.anonymizer);

    println!("{}", anonymizer.anonymize(&cli.query).await?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
