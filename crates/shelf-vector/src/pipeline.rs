//! Batch sync pipeline.
//!
//! Turns catalog products into stored embeddings. Products are processed in
//! sequential batches; within a batch every item runs concurrently and the
//! batch settles fully before the next one starts. A failing item is counted
//! and logged without affecting its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use shelf_core::config::SyncConfig;
use shelf_core::error::ShelfError;
use shelf_core::types::{EmbeddingRecord, Product, SyncReport};

use crate::embedding::DynEmbeddingService;
use crate::mirror::MemoryMirror;
use crate::store::VectorStore;

/// Embeds products and writes them to the durable store and the mirror.
pub struct SyncPipeline<S: VectorStore> {
    embedder: Arc<dyn DynEmbeddingService>,
    store: Arc<S>,
    mirror: MemoryMirror,
    batch_delay: Duration,
    item_timeout: Duration,
    description_max_chars: usize,
}

impl<S: VectorStore> SyncPipeline<S> {
    pub fn new(embedder: Arc<dyn DynEmbeddingService>, store: Arc<S>, mirror: MemoryMirror) -> Self {
        Self::with_config(embedder, store, mirror, &SyncConfig::default())
    }

    pub fn with_config(
        embedder: Arc<dyn DynEmbeddingService>,
        store: Arc<S>,
        mirror: MemoryMirror,
        config: &SyncConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            mirror,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            item_timeout: Duration::from_millis(config.item_timeout_ms),
            description_max_chars: config.description_max_chars,
        }
    }

    /// Pause between consecutive batches.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Timeout applied separately to each embedding and each store call.
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Sync `products` in batches of `batch_size` (zero is treated as one).
    ///
    /// Per-item failures are absorbed into [`SyncReport::failed`]. The run
    /// aborts only on a fatal condition: a missing provider credential
    /// (before any work) or a store-level error such as a dimension
    /// mismatch, reported once the current batch has settled.
    pub async fn sync(&self, products: &[Product], batch_size: usize) -> Result<SyncReport, ShelfError> {
        let mut report = SyncReport::default();
        if products.is_empty() {
            debug!("Nothing to sync");
            return Ok(report);
        }
        if !self.embedder.is_configured() {
            return Err(ShelfError::Config(
                "Embedding provider credential is not configured".to_string(),
            ));
        }

        let batch_size = batch_size.max(1);
        let total_batches = products.len().div_ceil(batch_size);
        info!(
            products = products.len(),
            batch_size,
            batches = total_batches,
            "Starting embedding sync"
        );

        for (index, batch) in products.chunks(batch_size).enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }

            let outcomes = join_all(batch.iter().map(|product| self.sync_one(product))).await;
            report.batches += 1;

            let mut stored = Vec::with_capacity(outcomes.len());
            let mut fatal = None;
            for (product, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(record) => stored.push(record),
                    Err(e) => {
                        report.failed += 1;
                        warn!(entity_id = product.id, error = %e, "Failed to sync product");
                        if e.is_fatal() && fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
            }
            report.synced += stored.len();
            self.mirror.load(stored);

            debug!(
                batch = index + 1,
                of = total_batches,
                synced = report.synced,
                failed = report.failed,
                "Batch settled"
            );

            if let Some(e) = fatal {
                warn!(
                    batch = index + 1,
                    synced = report.synced,
                    failed = report.failed,
                    error = %e,
                    "Aborting sync"
                );
                return Err(e);
            }
        }

        self.mirror.mark_ready();
        info!(
            synced = report.synced,
            failed = report.failed,
            batches = report.batches,
            "Embedding sync complete"
        );
        Ok(report)
    }

    async fn sync_one(&self, product: &Product) -> Result<EmbeddingRecord, ShelfError> {
        let text = product.composite_text(self.description_max_chars);
        let vector = self.timed(self.embedder.embed_boxed(&text)).await?;
        if vector.is_empty() {
            return Err(ShelfError::Provider("Provider returned an empty vector".to_string()));
        }

        let record = EmbeddingRecord::new(product.id, product.name.clone(), vector);
        self.timed(self.store.upsert(record.clone())).await?;
        Ok(record)
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, ShelfError>
    where
        F: Future<Output = Result<T, ShelfError>>,
    {
        match tokio::time::timeout(self.item_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ShelfError::Timeout(self.item_timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use shelf_core::types::QueryResult;

    use crate::embedding::{EmbeddingService, MockEmbedding, UnavailableEmbedding};

    /// In-memory store double; `reject` maps ids to the error their upsert returns.
    #[derive(Default)]
    struct RecordingStore {
        rows: Mutex<HashMap<i64, EmbeddingRecord>>,
        reject: HashMap<i64, fn() -> ShelfError>,
    }

    impl RecordingStore {
        fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        fn label(&self, id: i64) -> Option<String> {
            self.rows.lock().unwrap().get(&id).map(|r| r.label.clone())
        }
    }

    impl VectorStore for RecordingStore {
        async fn upsert(&self, record: EmbeddingRecord) -> Result<(), ShelfError> {
            if let Some(make_err) = self.reject.get(&record.entity_id) {
                return Err(make_err());
            }
            self.rows.lock().unwrap().insert(record.entity_id, record);
            Ok(())
        }

        async fn query(&self, _v: &[f32], _t: f64, _l: usize) -> Result<Vec<QueryResult>, ShelfError> {
            Ok(Vec::new())
        }

        async fn lexical_query(&self, _s: &str, _l: usize) -> Result<Vec<QueryResult>, ShelfError> {
            Ok(Vec::new())
        }

        async fn load_all(&self) -> Result<Vec<EmbeddingRecord>, ShelfError> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }
    }

    fn products(n: i64) -> Vec<Product> {
        (1..=n).map(|i| Product::new(i, format!("Product {}", i))).collect()
    }

    fn pipeline(
        embedder: impl DynEmbeddingService + 'static,
        store: RecordingStore,
    ) -> SyncPipeline<RecordingStore> {
        SyncPipeline::new(Arc::new(embedder), Arc::new(store), MemoryMirror::new())
            .with_batch_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let embedder = MockEmbedding::new();
        let p = pipeline(embedder.clone(), RecordingStore::default());

        let report = p.sync(&[], 50).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_input_without_credential_is_ok() {
        let p = pipeline(UnavailableEmbedding::new("no key"), RecordingStore::default());
        assert_eq!(p.sync(&[], 50).await.unwrap().synced, 0);
    }

    #[tokio::test]
    async fn test_missing_credential_aborts_before_work() {
        let p = pipeline(UnavailableEmbedding::new("no key"), RecordingStore::default());
        let err = p.sync(&products(3), 50).await.unwrap_err();
        assert!(matches!(err, ShelfError::Config(_)));
        assert_eq!(p.store.len(), 0);
    }

    #[tokio::test]
    async fn test_batches_and_counts() {
        let embedder = MockEmbedding::new();
        let p = pipeline(embedder.clone(), RecordingStore::default());

        let report = p.sync(&products(7), 3).await.unwrap();
        assert_eq!(report.synced, 7);
        assert_eq!(report.failed, 0);
        assert_eq!(report.batches, 3);
        assert_eq!(embedder.calls(), 7);
        assert_eq!(p.store.len(), 7);
        assert_eq!(p.mirror.len(), 7);
        assert!(p.mirror.is_ready());
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_one() {
        let p = pipeline(MockEmbedding::new(), RecordingStore::default());
        let report = p.sync(&products(3), 0).await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.synced, 3);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_affect_siblings() {
        let embedder = MockEmbedding::failing_on(["Product 2"]);
        let p = pipeline(embedder, RecordingStore::default());

        let report = p.sync(&products(3), 10).await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(p.store.label(1).as_deref(), Some("Product 1"));
        assert_eq!(p.store.label(2), None);
        assert_eq!(p.store.label(3).as_deref(), Some("Product 3"));
        assert_eq!(p.mirror.len(), 2);
    }

    #[tokio::test]
    async fn test_store_error_counts_as_failure() {
        let mut reject: HashMap<i64, fn() -> ShelfError> = HashMap::new();
        reject.insert(2, || ShelfError::Store("disk full".to_string()));
        let p = pipeline(
            MockEmbedding::new(),
            RecordingStore {
                reject,
                ..Default::default()
            },
        );

        let report = p.sync(&products(4), 2).await.unwrap();
        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.batches, 2);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_aborts_after_batch() {
        let mut reject: HashMap<i64, fn() -> ShelfError> = HashMap::new();
        reject.insert(3, || ShelfError::DimensionMismatch {
            expected: 384,
            actual: 1536,
        });
        let p = pipeline(
            MockEmbedding::new(),
            RecordingStore {
                reject,
                ..Default::default()
            },
        );

        let err = p.sync(&products(6), 2).await.unwrap_err();
        assert!(matches!(err, ShelfError::DimensionMismatch { .. }));
        // Batch two settled (id 4 stored); batch three never ran.
        assert_eq!(p.store.len(), 3);
        assert_eq!(p.store.label(5), None);
        assert!(!p.mirror.is_empty());
    }

    #[tokio::test]
    async fn test_resync_overwrites_label() {
        let p = pipeline(MockEmbedding::new(), RecordingStore::default());
        p.sync(&[Product::new(1, "Old name")], 10).await.unwrap();
        p.sync(&[Product::new(1, "New name")], 10).await.unwrap();

        assert_eq!(p.store.len(), 1);
        assert_eq!(p.store.label(1).as_deref(), Some("New name"));
        assert_eq!(p.mirror.lookup("new", None, 0.0, 5)[0].entity_id, 1);
        assert!(p.mirror.lookup("old", None, 0.0, 5).is_empty());
    }

    /// Embedder that records the peak number of concurrent calls.
    #[derive(Default)]
    struct GaugeEmbedding {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl EmbeddingService for Arc<GaugeEmbedding> {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ShelfError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(MockEmbedding::hash_to_vector(text))
        }
    }

    #[tokio::test]
    async fn test_in_flight_bounded_by_batch_size() {
        let gauge = Arc::new(GaugeEmbedding::default());
        let p = pipeline(Arc::clone(&gauge), RecordingStore::default());

        let report = p.sync(&products(10), 4).await.unwrap();
        assert_eq!(report.synced, 10);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 4);
        assert_eq!(gauge.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_batches() {
        let p = SyncPipeline::new(
            Arc::new(MockEmbedding::new()),
            Arc::new(RecordingStore::default()),
            MemoryMirror::new(),
        )
        .with_batch_delay(Duration::from_millis(1000));

        let start = tokio::time::Instant::now();
        let report = p.sync(&products(5), 2).await.unwrap();
        assert_eq!(report.batches, 3);
        // Two pauses: after batch one and after batch two, none after the last.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(3000));
    }

    struct StallingEmbedding;

    impl EmbeddingService for StallingEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ShelfError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![1.0])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_timeout_counts_as_failure() {
        let p = pipeline(StallingEmbedding, RecordingStore::default())
            .with_item_timeout(Duration::from_millis(50));

        let report = p.sync(&products(2), 2).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.synced, 0);
        assert!(p.mirror.is_ready());
    }
}
