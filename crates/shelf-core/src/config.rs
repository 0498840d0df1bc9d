use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ShelfError};

/// Top-level configuration for the Shelf search core.
///
/// Loaded from `~/.shelf/config.toml` by default. Each section corresponds
/// to one stage of the search subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShelfConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ShelfConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ShelfConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults only
    /// when the file does not exist. A file that exists but cannot be read,
    /// parsed, or validated is an error.
    pub fn load_or_default_if_missing(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if !(-1.0..=1.0).contains(&search.default_threshold) {
            return Err(ShelfError::Config(format!(
                "search.default_threshold must be within [-1, 1], got {}",
                search.default_threshold
            )));
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            return Err(ShelfError::Config(format!(
                "search.default_limit must be within 1..={}, got {}",
                search.max_limit, search.default_limit
            )));
        }
        for (name, value) in [
            ("store_lexical_similarity", search.store_lexical_similarity),
            ("memory_lexical_similarity", search.memory_lexical_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ShelfError::Config(format!(
                    "search.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.sync.batch_size == 0 {
            return Err(ShelfError::Config("sync.batch_size must be > 0".to_string()));
        }
        match self.embedding.provider.as_str() {
            "openai" | "mock" => Ok(()),
            other => Err(ShelfError::Config(format!(
                "embedding.provider must be \"openai\" or \"mock\", got \"{}\"",
                other
            ))),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.shelf/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider backend: "openai" or "mock".
    pub provider: String,
    /// Full URL of the embeddings endpoint.
    pub api_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Requested encoding of the returned vectors.
    pub encoding_format: String,
    /// Credential. When absent, `api_key_env` is consulted.
    pub api_key: Option<String>,
    /// Environment variable holding the credential.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_url: "https://api.openai.com/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            encoding_format: "float".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the provider credential: explicit key first, then the
    /// environment variable. Blank values count as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum cosine similarity a vector hit must exceed.
    pub default_threshold: f64,
    /// Default number of results.
    pub default_limit: usize,
    /// Maximum number of results a caller may request.
    pub max_limit: usize,
    /// Constant score assigned to durable-store lexical matches.
    pub store_lexical_similarity: f64,
    /// Constant score assigned to mirror substring matches.
    pub memory_lexical_similarity: f64,
    /// Timeout applied to each provider or store call during a search.
    pub tier_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: 0.3,
            default_limit: 20,
            max_limit: 100,
            store_lexical_similarity: 0.75,
            memory_lexical_similarity: 0.8,
            tier_timeout_ms: 5_000,
        }
    }
}

/// Catalog synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Entities embedded concurrently per batch.
    pub batch_size: usize,
    /// Pause between batches, for provider rate limits.
    pub batch_delay_ms: u64,
    /// Description characters kept in the composite embedding text.
    pub description_max_chars: usize,
    /// Timeout applied to each embed or upsert call during a sync.
    pub item_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 1_000,
            description_max_chars: 500,
            item_timeout_ms: 30_000,
        }
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name, relative to `general.data_dir`.
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_file: "shelf.db".to_string(),
        }
    }
}
