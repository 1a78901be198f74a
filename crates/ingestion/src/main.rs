//! RagForge Ingestion Service
//!
//! Indexes documents into the corpus:
//! - `ingestion <file>...` stores each text file as a document and indexes it
//! - `ingestion` with no arguments indexes every pending document

use ragforge_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository},
    embeddings::create_embedder,
    generation::create_generator,
    metrics, VERSION,
};
use ragforge_ingestion::{Contextualizer, DocumentIndexer, IngestionError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| IngestionError::ConfigError(e.to_string()))?;

    init_tracing(&config.observability);
    info!("Starting RagForge Ingestion Service v{}", VERSION);

    metrics::register_metrics();
    metrics::install_exporter(config.observability.metrics_port)?;

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store = Arc::new(Repository::new(db));

    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;
    let contextualizer = Contextualizer::new(generator, config.generation.cache_ttl());
    let indexer = DocumentIndexer::new(store, embedder, contextualizer, config.chunking.clone());

    let files: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();

    if files.is_empty() {
        let reports = indexer.index_pending().await?;
        info!(indexed = reports.len(), "Pending documents indexed");
        return Ok(());
    }

    let mut failures = 0usize;
    for path in &files {
        match indexer.ingest_file(path).await {
            Ok(report) => info!(
                path = %path.display(),
                document_id = %report.document_id,
                chunks = report.chunks,
                "File ingested"
            ),
            Err(e) => {
                failures += 1;
                error!(path = %path.display(), error = %e, "Failed to ingest file");
            }
        }
    }

    info!(total = files.len(), failures, "Ingestion complete");
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
