//! Shelf application binary - composition root.
//!
//! Ties together all Shelf crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open the SQLite embedding store
//! 3. Build the embedding provider (falls back to a degraded provider when
//!    no credential is configured)
//! 4. Warm the in-memory mirror from the store
//! 5. Run the requested subcommand and print JSON to stdout

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use shelf_core::config::{EmbeddingConfig, ShelfConfig};
use shelf_core::error::ShelfError;
use shelf_core::types::Product;
use shelf_storage::{Database, EmbeddingRepository};
use shelf_vector::embedding::{DynEmbeddingService, MockEmbedding, OpenAiEmbeddingService, UnavailableEmbedding};
use shelf_vector::mirror::MemoryMirror;
use shelf_vector::pipeline::SyncPipeline;
use shelf_vector::search::{RetrievalOrchestrator, SearchOptions};
use shelf_vector::store::SqliteVectorStore;

use cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Build the configured embedding provider.
///
/// A missing credential does not stop the binary: search still works on the
/// lexical and memory tiers, and sync reports the configuration error.
fn build_embedder(config: &EmbeddingConfig) -> Arc<dyn DynEmbeddingService> {
    match config.provider.as_str() {
        "mock" => {
            tracing::warn!("Using mock embedding provider");
            Arc::new(MockEmbedding::new())
        }
        _ => match OpenAiEmbeddingService::from_config(config) {
            Ok(service) => {
                tracing::info!(model = %config.model, "Embedding provider ready");
                Arc::new(service)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Embedding provider unavailable, search will degrade to lexical tiers");
                Arc::new(UnavailableEmbedding::new(e.to_string()))
            }
        },
    }
}

/// Read a JSON array of products.
fn load_catalog(path: &Path) -> Result<Vec<Product>, ShelfError> {
    let content = std::fs::read_to_string(path)?;
    let products: Vec<Product> = serde_json::from_str(&content)?;
    Ok(products)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ShelfConfig::load_or_default_if_missing(&config_file)?;
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }

    // Tracing. Stdout carries command output, logs go to stderr.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Shelf v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db_path = data_dir.join(&config.storage.db_file);
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let repo = EmbeddingRepository::new(Arc::clone(&db));
    let store = Arc::new(
        SqliteVectorStore::new(repo.clone()).with_lexical_similarity(config.search.store_lexical_similarity),
    );
    let mirror = MemoryMirror::with_lexical_similarity(config.search.memory_lexical_similarity);
    let embedder = build_embedder(&config.embedding);

    let orchestrator = RetrievalOrchestrator::new(Arc::clone(&embedder), Arc::clone(&store), mirror.clone())
        .with_config(&config.search);

    // Mirror warm-up. Failure leaves the mirror empty; search still runs.
    if let Err(e) = orchestrator.reload_mirror().await {
        tracing::warn!(error = %e, "Mirror warm-up failed");
    }

    match args.command {
        Command::Sync { catalog, batch_size } => {
            let products = load_catalog(&catalog)?;
            tracing::info!(path = %catalog.display(), products = products.len(), "Catalog loaded");

            let pipeline = SyncPipeline::with_config(embedder, store, mirror, &config.sync);
            let batch_size = batch_size.unwrap_or(config.sync.batch_size);
            let report = pipeline.sync(&products, batch_size).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Search {
            query,
            threshold,
            limit,
        } => {
            let mut options = SearchOptions::from(&config.search);
            if let Some(threshold) = threshold {
                options.threshold = threshold;
            }
            if let Some(limit) = limit {
                options.limit = limit;
            }
            let outcome = orchestrator.search_detailed(&query, options).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Stats => {
            let stats = serde_json::json!({
                "db_path": db_path.display().to_string(),
                "stored": repo.count()?,
                "dimension": repo.dimension()?,
                "mirror_entries": orchestrator.mirror().len(),
                "provider_configured": embedder.is_configured(),
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
