//! Server entry point.
//!
//! Reads configuration from the environment (see [`ragserve::config`]),
//! connects to Postgres, runs migrations, spawns the embedding worker and
//! chunking coordinator tasks, and serves the HTTP API.
//!
//! ```bash
//! DATABASE_URL=postgres://... OBJECT_STORE_TYPE=local ragserve -p 8080
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use ragserve::cache::PassthroughCache;
use ragserve::chunk_service::ChunkService;
use ragserve::config::{Config, ObjectStoreConfig};
use ragserve::document::DocumentService;
use ragserve::embedder::create_embedder;
use ragserve::embedding_worker::EmbeddingService;
use ragserve::objectstore::{LocalStore, ObjectStore, S3Store};
use ragserve::postgres::PgRepository;
use ragserve::retrieval::RetrievalService;
use ragserve::server::{run_server, AppState};
use ragserve::{db, migrate};

#[derive(Parser)]
#[command(
    name = "ragserve",
    about = "Retrieval-augmented knowledge base backend",
    version
)]
struct Cli {
    /// Port to run the server on.
    #[arg(short = 'p', default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{:#}", err), "startup failed");
            ExitCode::FAILURE
        }
    }
}

/// LOG_LEVEL (TRACE..FATAL) maps onto an env filter; FATAL collapses to
/// ERROR, which is the level startup failures log at before exiting.
fn init_tracing() {
    let level = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "INFO".to_string())
        .to_ascii_lowercase();
    let level = match level.as_str() {
        "fatal" => "error".to_string(),
        other => other.to_string(),
    };
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let pool = db::connect(&config.database_url).await?;
    migrate::run_migrations(&pool).await?;

    let store: Arc<dyn ObjectStore> = match &config.object_store {
        ObjectStoreConfig::Local { root } => Arc::new(LocalStore::new(root.clone())),
        ObjectStoreConfig::S3(s3) => Arc::new(S3Store::new(s3.clone())),
    };

    let embedder: Arc<dyn ragserve::embedder::TextEmbedder> =
        Arc::from(create_embedder(&config.embedding)?);

    let repo = Arc::new(PassthroughCache::new(PgRepository::new(pool)));

    let (embed_tx, embed_rx) = EmbeddingService::channel();
    let embed_service = Arc::new(EmbeddingService::new(
        embedder.clone(),
        repo.clone(),
        config.default_model_id.clone(),
        embed_tx,
    ));
    tokio::spawn(embed_service.clone().run(embed_rx));

    let chunk_service = Arc::new(ChunkService::new(
        repo.clone(),
        store.clone(),
        Some(embed_service.clone()),
    ));
    let (chunking_tx, chunking_rx) = ChunkService::channel();
    tokio::spawn(chunk_service.clone().run(chunking_rx));

    let retrieval_service = Arc::new(RetrievalService::new(repo.clone(), embedder));
    let document_service = Arc::new(DocumentService::new(
        repo.clone(),
        repo.clone(),
        store,
        Some(chunking_tx),
    ));

    let state = AppState {
        chunking: chunk_service,
        retrieval: retrieval_service,
        documents: document_service,
    };

    run_server(state, cli.port).await
}
