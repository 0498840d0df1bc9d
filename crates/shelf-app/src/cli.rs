//! CLI argument definitions for the shelf binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shelf - semantic product search over a catalog.
#[derive(Parser, Debug)]
#[command(name = "shelf", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite store.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Embed a catalog file and store the vectors.
    Sync {
        /// JSON file holding an array of products.
        #[arg(long = "catalog")]
        catalog: PathBuf,

        /// Products per batch; overrides `sync.batch_size`.
        #[arg(short = 'b', long = "batch-size")]
        batch_size: Option<usize>,
    },

    /// Search the catalog and print results as JSON.
    Search {
        /// Free-text query.
        query: String,

        /// Minimum cosine similarity; overrides `search.default_threshold`.
        #[arg(short = 't', long = "threshold", allow_negative_numbers = true)]
        threshold: Option<f64>,

        /// Maximum results; overrides `search.default_limit`.
        #[arg(short = 'n', long = "limit")]
        limit: Option<usize>,
    },

    /// Print store statistics as JSON.
    Stats,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SHELF_CONFIG env var > platform default (~/.shelf/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SHELF_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".shelf").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".shelf").join("config.toml");
    }
    PathBuf::from("config.toml")
}
