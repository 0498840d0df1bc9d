//! Durable vector store boundary.
//!
//! [`VectorStore`] is what the orchestrator and sync pipeline talk to;
//! [`SqliteVectorStore`] adapts the blocking rusqlite repository by running
//! each call on the blocking thread pool.

use std::future::Future;

use shelf_core::error::ShelfError;
use shelf_core::types::{EmbeddingRecord, QueryResult};
use shelf_storage::EmbeddingRepository;

/// Default constant score for durable-store lexical matches.
pub const DEFAULT_STORE_LEXICAL_SIMILARITY: f64 = 0.75;

/// Durable keyed storage of `(entity_id, label, vector)` triples.
pub trait VectorStore: Send + Sync {
    /// Idempotent insert-or-replace keyed by `record.entity_id`.
    fn upsert(&self, record: EmbeddingRecord) -> impl Future<Output = Result<(), ShelfError>> + Send;

    /// Entities strictly above `threshold`, best first, ties by id.
    /// An empty list is a valid answer, not an error.
    fn query(
        &self,
        vector: &[f32],
        threshold: f64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueryResult>, ShelfError>> + Send;

    /// Case-insensitive substring match on labels, ordered by label, each
    /// hit carrying the store's constant lexical similarity.
    fn lexical_query(
        &self,
        substring: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<QueryResult>, ShelfError>> + Send;

    /// Every stored record, for rebuilding the in-memory mirror.
    fn load_all(&self) -> impl Future<Output = Result<Vec<EmbeddingRecord>, ShelfError>> + Send;
}

/// [`VectorStore`] backed by the SQLite embedding repository.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    repo: EmbeddingRepository,
    lexical_similarity: f64,
}

impl SqliteVectorStore {
    pub fn new(repo: EmbeddingRepository) -> Self {
        Self {
            repo,
            lexical_similarity: DEFAULT_STORE_LEXICAL_SIMILARITY,
        }
    }

    /// Override the constant score assigned to lexical matches.
    pub fn with_lexical_similarity(mut self, similarity: f64) -> Self {
        self.lexical_similarity = similarity;
        self
    }

    pub fn repository(&self) -> &EmbeddingRepository {
        &self.repo
    }

    /// Run a blocking repository call off the async executor.
    async fn blocking<F, T>(&self, f: F) -> Result<T, ShelfError>
    where
        F: FnOnce(EmbeddingRepository) -> Result<T, ShelfError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || f(repo))
            .await
            .map_err(|e| ShelfError::Store(format!("Store task panicked: {}", e)))?
    }
}

impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, record: EmbeddingRecord) -> Result<(), ShelfError> {
        self.blocking(move |repo| repo.upsert(&record)).await
    }

    async fn query(
        &self,
        vector: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<QueryResult>, ShelfError> {
        let vector = vector.to_vec();
        self.blocking(move |repo| repo.query(&vector, threshold, limit))
            .await
    }

    async fn lexical_query(&self, substring: &str, limit: usize) -> Result<Vec<QueryResult>, ShelfError> {
        let substring = substring.to_string();
        let similarity = self.lexical_similarity;
        self.blocking(move |repo| repo.lexical_query(&substring, limit, similarity))
            .await
    }

    async fn load_all(&self) -> Result<Vec<EmbeddingRecord>, ShelfError> {
        self.blocking(|repo| repo.load_all()).await
    }
}
