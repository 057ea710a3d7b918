use anyhow::{Context, Result};
use buildhub_search::config::{Config, StoreBackend};
use buildhub_search::store::{ElasticsearchStore, MemoryStore, SearchStore};
use buildhub_search::{search_router, SearchState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "buildhub-server")]
#[command(about = "Validated search API over build records")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "buildhub.toml")]
    config: PathBuf,

    /// Server bind address (overrides config)
    #[arg(long)]
    bind_addr: Option<String>,

    /// Largest `size` a search may ask for (overrides config)
    #[arg(long, env = "MAX_SEARCH_SIZE")]
    max_search_size: Option<u64>,

    /// Store base URL (overrides config)
    #[arg(long, env = "ELASTICSEARCH_URL")]
    store_url: Option<String>,

    /// Index searched (overrides config)
    #[arg(long)]
    index: Option<String>,

    /// Store backend: elasticsearch or memory (overrides config)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Log output: pretty or json (overrides config)
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(bind_addr) = self.bind_addr {
            config.server.bind_addr = bind_addr;
        }
        if let Some(max_search_size) = self.max_search_size {
            config.search.max_search_size = max_search_size;
        }
        if let Some(url) = self.store_url {
            config.store.url = url;
        }
        if let Some(index) = self.index {
            config.store.index = index;
        }
        if let Some(backend) = self.store {
            config.store.backend = backend;
        }
        if let Some(log_format) = self.log_format {
            config.observability.log_format = log_format;
        }
    }
}

fn init_tracing(config: &Config) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn SearchStore>> {
    Ok(match config.store.backend {
        StoreBackend::Elasticsearch => {
            let store = ElasticsearchStore::new(&config.store).context("Failed to create store client")?;
            tracing::info!("Search store: {}", store.search_url());
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Search store: in-memory, nothing is persisted");
            Arc::new(MemoryStore::new(config.store.index.clone()))
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone();
    let (mut config, save_error) = Config::load_or_create(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config);

    if let Some(e) = save_error {
        tracing::warn!(path = %config_path.display(), error = %e, "could not write default config");
    }

    tracing::info!("Starting buildhub search server");
    tracing::info!("Bind address: {}", config.server.bind_addr);
    tracing::info!("Max search size: {}", config.search.max_search_size);

    let store = build_store(&config)?;
    let state = SearchState::new(store, config.search);
    let app = search_router(state, config.server.max_body_size);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
