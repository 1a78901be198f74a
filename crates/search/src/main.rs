//! RagForge Search CLI
//!
//! - `search search <document|chunk|sentence> <query>` prints ranked hits
//! - `search ask [--hybrid] [--euclidean] [--rerank] <query>` prints the answer JSON
//! - `search eval [--hybrid] [--rerank] <dataset.json>` prints the evaluation report

use anyhow::{bail, Context};
use ragforge_common::{
    cache::{Cache, DedupCache, MemoryCache},
    config::{AppConfig, ObservabilityConfig, RedisConfig},
    db::{DbPool, Repository},
    embeddings::create_embedder,
    generation::create_generator,
    metrics, VERSION,
};
use ragforge_search::{
    eval::{Dataset, Evaluator},
    AnswerRequest, Granularity, RagEngine, SearchService, SearchType,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage:
  search search <document|chunk|sentence> [--euclidean|--hybrid] <query>
  search ask [--hybrid|--euclidean] [--rerank] <query>
  search eval [--hybrid|--euclidean] [--rerank] <dataset.json>";

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr so stdout carries only results
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Flags and positional words of one subcommand
struct Invocation {
    search_type: SearchType,
    rerank: bool,
    words: Vec<String>,
}

impl Invocation {
    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut invocation = Self {
            search_type: SearchType::Cosine,
            rerank: false,
            words: Vec::new(),
        };
        for arg in args {
            match arg.as_str() {
                "--hybrid" => invocation.search_type = SearchType::Hybrid,
                "--euclidean" => invocation.search_type = SearchType::Euclidean,
                "--rerank" => invocation.rerank = true,
                _ => invocation.words.push(arg),
            }
        }
        invocation
    }

    fn text(&self) -> String {
        self.words.join(" ")
    }
}

async fn connect_dedup(config: &RedisConfig) -> Arc<dyn DedupCache> {
    let Some(url) = config.url.as_deref() else {
        warn!("Redis URL not set, using in-process fallback dedup");
        return Arc::new(MemoryCache::new());
    };

    let connected = match Cache::new(url, &config.key_prefix).await {
        Ok(cache) => cache.ping().await.map(|()| cache),
        Err(e) => Err(e),
    };
    match connected {
        Ok(cache) => {
            info!("Redis cache connected");
            Arc::new(cache)
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to Redis, using in-process fallback dedup");
            Arc::new(MemoryCache::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let Some(command) = args.next() else {
        bail!(USAGE);
    };

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.observability);
    info!("Starting RagForge Search v{}", VERSION);
    metrics::register_metrics();
    metrics::install_exporter(config.observability.metrics_port)?;

    let db = DbPool::new(&config.database).await?;
    let store = Arc::new(Repository::new(db));
    let embedder = create_embedder(&config.embedding)?;
    let search = SearchService::new(store.clone(), embedder, config.retrieval.clone());

    match command.as_str() {
        "search" => {
            let granularity: Granularity = match args.next() {
                Some(name) => name.parse()?,
                None => bail!(USAGE),
            };
            let invocation = Invocation::parse(args);
            if invocation.words.is_empty() {
                bail!(USAGE);
            }
            let hits = search
                .search(&invocation.text(), granularity, invocation.search_type, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        "ask" | "eval" => {
            let invocation = Invocation::parse(args);
            if invocation.words.is_empty() {
                bail!(USAGE);
            }

            let generator = create_generator(&config.generation)?;
            let dedup = connect_dedup(&config.redis).await;
            let engine = RagEngine::new(search, generator, store, dedup, config.rag.clone());

            if command == "ask" {
                let mut request =
                    AnswerRequest::new(invocation.text()).search_type(invocation.search_type);
                if invocation.rerank {
                    request = request.rerank(None);
                }
                let answer = engine.answer(&request).await?;
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                let dataset = Dataset::load(Path::new(&invocation.text())).await?;
                let summary = Evaluator::new(&engine)
                    .search_type(invocation.search_type)
                    .rerank(invocation.rerank)
                    .evaluate(&dataset)
                    .await?;
                println!("{}", summary);
            }
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}
