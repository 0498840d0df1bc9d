//! Retrieval orchestrator: tiered fallback search.
//!
//! A query is embedded once, then tried against an ordered list of tiers:
//!
//! 1. [`Tier::Vector`]: similarity query on the durable store.
//! 2. [`Tier::Lexical`]: substring match on the durable store.
//! 3. [`Tier::Memory`]: the in-memory mirror, by vector and then substring.
//!
//! The first tier producing a non-empty list wins in full. Any failure or
//! empty answer hands over to the next tier, timeouts included. When
//! the query cannot be embedded, tiers needing a vector are skipped.
//! Search never fails; every error is absorbed and logged here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use shelf_core::config::SearchConfig;
use shelf_core::error::ShelfError;
use shelf_core::types::QueryResult;

use crate::embedding::DynEmbeddingService;
use crate::mirror::MemoryMirror;
use crate::store::VectorStore;

/// One strategy in the fallback cascade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Vector,
    Lexical,
    Memory,
}

impl Tier {
    /// Cascade used when the query vector is available.
    pub const WITH_VECTOR: [Tier; 3] = [Tier::Vector, Tier::Lexical, Tier::Memory];
    /// Cascade used when the query could not be embedded.
    pub const WITHOUT_VECTOR: [Tier; 2] = [Tier::Lexical, Tier::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Vector => "vector",
            Tier::Lexical => "lexical",
            Tier::Memory => "memory",
        }
    }

    /// Try this tier. `None` means "move on" to the next one.
    async fn attempt<S: VectorStore>(
        self,
        orchestrator: &RetrievalOrchestrator<S>,
        query: &TierQuery<'_>,
    ) -> Option<Vec<QueryResult>> {
        let outcome = match self {
            Tier::Vector => {
                let vector = query.vector?;
                orchestrator
                    .timed(orchestrator.store.query(vector, query.threshold, query.limit))
                    .await
            }
            Tier::Lexical => {
                orchestrator
                    .timed(orchestrator.store.lexical_query(query.text, query.limit))
                    .await
            }
            Tier::Memory => {
                let mirror = &orchestrator.mirror;
                let mut results = match query.vector {
                    Some(vector) => mirror.lookup(query.text, Some(vector), query.threshold, query.limit),
                    None => Vec::new(),
                };
                if results.is_empty() {
                    results = mirror.lookup(query.text, None, query.threshold, query.limit);
                }
                Ok(results)
            }
        };

        match outcome {
            Ok(results) if results.is_empty() => {
                debug!(tier = self.as_str(), query = query.text, "Tier returned no results");
                None
            }
            Ok(results) => Some(results),
            Err(e) => {
                warn!(
                    tier = self.as_str(),
                    query = query.text,
                    error = %e,
                    "Tier failed, falling back"
                );
                None
            }
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call search parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Cosine similarity a vector hit must strictly exceed.
    pub threshold: f64,
    /// Maximum number of results.
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            limit: 20,
        }
    }
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            threshold: config.default_threshold,
            limit: config.default_limit,
        }
    }
}

/// Results plus the tier that produced them (`None` when every tier came
/// up empty).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<QueryResult>,
    pub tier: Option<Tier>,
}

struct TierQuery<'a> {
    text: &'a str,
    vector: Option<&'a [f32]>,
    threshold: f64,
    limit: usize,
}

/// Runs the tier cascade for free-text queries.
///
/// Owns its [`MemoryMirror`]; share the mirror with a
/// [`SyncPipeline`](crate::pipeline::SyncPipeline) by cloning it.
pub struct RetrievalOrchestrator<S: VectorStore> {
    embedder: Arc<dyn DynEmbeddingService>,
    store: Arc<S>,
    mirror: MemoryMirror,
    tier_timeout: Duration,
    max_limit: usize,
}

impl<S: VectorStore> RetrievalOrchestrator<S> {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>, store: Arc<S>, mirror: MemoryMirror) -> Self {
        let defaults = SearchConfig::default();
        Self {
            embedder,
            store,
            mirror,
            tier_timeout: Duration::from_millis(defaults.tier_timeout_ms),
            max_limit: defaults.max_limit,
        }
    }

    /// Apply timeout and limit settings from configuration.
    pub fn with_config(mut self, config: &SearchConfig) -> Self {
        self.tier_timeout = Duration::from_millis(config.tier_timeout_ms);
        self.max_limit = config.max_limit;
        self
    }

    /// Timeout applied to the embedding call and each store call.
    pub fn with_tier_timeout(mut self, timeout: Duration) -> Self {
        self.tier_timeout = timeout;
        self
    }

    pub fn mirror(&self) -> &MemoryMirror {
        &self.mirror
    }

    /// Search and return only the results. Never fails.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Vec<QueryResult> {
        self.search_detailed(query, options).await.results
    }

    /// Search and report which tier served the results. Never fails.
    pub async fn search_detailed(&self, query: &str, options: SearchOptions) -> SearchOutcome {
        let text = query.trim();
        let limit = options.limit.min(self.max_limit);
        if text.is_empty() || limit == 0 {
            debug!(query, limit, "Empty query or zero limit, nothing to search");
            return SearchOutcome::default();
        }

        let vector = match self.timed(self.embedder.embed_boxed(text)).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                warn!(query = text, "Provider returned an empty query vector");
                None
            }
            Err(e) => {
                warn!(query = text, error = %e, "Query embedding failed, skipping vector tiers");
                None
            }
        };

        let tiers: &[Tier] = if vector.is_some() {
            &Tier::WITH_VECTOR
        } else {
            &Tier::WITHOUT_VECTOR
        };

        let tier_query = TierQuery {
            text,
            vector: vector.as_deref(),
            threshold: options.threshold,
            limit,
        };

        for (position, tier) in tiers.iter().enumerate() {
            if let Some(results) = tier.attempt(self, &tier_query).await {
                if position > 0 || vector.is_none() {
                    info!(
                        tier = tier.as_str(),
                        query = text,
                        results = results.len(),
                        "Search served by fallback tier"
                    );
                } else {
                    debug!(tier = tier.as_str(), results = results.len(), "Search served");
                }
                return SearchOutcome {
                    results,
                    tier: Some(*tier),
                };
            }
        }

        if vector.is_none() && !self.mirror.is_ready() {
            warn!(query = text, "Search fully degraded: no provider and empty mirror");
        } else {
            debug!(query = text, "No tier produced results");
        }
        SearchOutcome::default()
    }

    /// Rebuild the mirror from the durable store, replacing its content.
    pub async fn reload_mirror(&self) -> Result<usize, ShelfError> {
        let records = self.timed(self.store.load_all()).await?;
        let loaded = self.mirror.replace_all(records);
        info!(loaded, "Memory mirror reloaded from store");
        Ok(loaded)
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ShelfError>
    where
        F: Future<Output = Result<T, ShelfError>>,
    {
        match tokio::time::timeout(self.tier_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ShelfError::Timeout(self.tier_timeout.as_millis() as u64)),
        }
    }
}
