//! In-memory mirror of the embedding store.
//!
//! The last-resort retrieval tier: needs neither network nor database and
//! never fails. Readers take a snapshot `Arc` of the current map and score
//! without holding a lock; writers build a new map under a single-writer
//! mutex and swap it in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use shelf_core::similarity::{cosine_similarity, rank};
use shelf_core::types::{EmbeddingRecord, QueryResult};

/// Default constant score for mirror substring matches.
pub const DEFAULT_MEMORY_LEXICAL_SIMILARITY: f64 = 0.8;

#[derive(Debug, Clone)]
struct MirrorEntry {
    label: String,
    label_lower: String,
    vector: Vec<f32>,
}

type Snapshot = Arc<HashMap<i64, MirrorEntry>>;

#[derive(Debug)]
struct MirrorInner {
    entries: RwLock<Snapshot>,
    writer: Mutex<()>,
    ready: AtomicBool,
    lexical_similarity: f64,
}

/// Process-local copy of `(entity_id, label, vector)` triples.
///
/// Cheap to clone; clones share the same content.
#[derive(Debug, Clone)]
pub struct MemoryMirror {
    inner: Arc<MirrorInner>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::with_lexical_similarity(DEFAULT_MEMORY_LEXICAL_SIMILARITY)
    }

    /// Create an empty mirror whose substring hits score `similarity`.
    pub fn with_lexical_similarity(similarity: f64) -> Self {
        Self {
            inner: Arc::new(MirrorInner {
                entries: RwLock::new(Arc::new(HashMap::new())),
                writer: Mutex::new(()),
                ready: AtomicBool::new(false),
                lexical_similarity: similarity,
            }),
        }
    }

    /// Upsert records by entity id. Returns the number of records applied.
    pub fn load<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = EmbeddingRecord>,
    {
        let _writer = self.inner.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next: HashMap<i64, MirrorEntry> = (*self.snapshot()).clone();
        let applied = insert_all(&mut next, records);
        self.swap(next, applied);
        applied
    }

    /// Replace the whole content with `records`.
    pub fn replace_all<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = EmbeddingRecord>,
    {
        let _writer = self.inner.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = HashMap::new();
        let applied = insert_all(&mut next, records);
        self.swap(next, applied);
        applied
    }

    /// Flag the mirror as usable even if it holds nothing, e.g. after a
    /// sync completed in-process.
    pub fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::SeqCst);
    }

    /// True once a record was loaded or a sync completed.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up entries by substring or by vector.
    ///
    /// Without a vector: case-insensitive substring match on labels, ordered
    /// by label, each hit scoring the constant lexical similarity. With a
    /// vector: cosine similarity against every entry, strictly above
    /// `threshold`, best first, ties by id.
    pub fn lookup(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        threshold: f64,
        limit: usize,
    ) -> Vec<QueryResult> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() || limit == 0 {
            return Vec::new();
        }

        match query_vector {
            Some(vector) => {
                let candidates = snapshot
                    .iter()
                    .map(|(id, entry)| QueryResult {
                        entity_id: *id,
                        label: entry.label.clone(),
                        similarity: cosine_similarity(vector, &entry.vector),
                    })
                    .collect();
                rank(candidates, threshold, limit)
            }
            None => {
                let needle = query_text.trim().to_lowercase();
                if needle.is_empty() {
                    return Vec::new();
                }

                let mut hits: Vec<(&i64, &MirrorEntry)> = snapshot
                    .iter()
                    .filter(|(_, entry)| entry.label_lower.contains(&needle))
                    .collect();
                hits.sort_by(|(a_id, a), (b_id, b)| a.label.cmp(&b.label).then(a_id.cmp(b_id)));

                hits.into_iter()
                    .take(limit)
                    .map(|(id, entry)| QueryResult {
                        entity_id: *id,
                        label: entry.label.clone(),
                        similarity: self.inner.lexical_similarity,
                    })
                    .collect()
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        let guard = self.inner.entries.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    fn swap(&self, next: HashMap<i64, MirrorEntry>, applied: usize) {
        let size = next.len();
        {
            let mut guard = self.inner.entries.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::new(next);
        }
        if applied > 0 {
            self.mark_ready();
        }
        debug!(applied, size, "Memory mirror updated");
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_all<I>(map: &mut HashMap<i64, MirrorEntry>, records: I) -> usize
where
    I: IntoIterator<Item = EmbeddingRecord>,
{
    let mut applied = 0;
    for record in records {
        map.insert(
            record.entity_id,
            MirrorEntry {
                label_lower: record.label.to_lowercase(),
                label: record.label,
                vector: record.vector,
            },
        );
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<EmbeddingRecord> {
        vec![
            EmbeddingRecord::new(1, "Fior di Latte Mozzarella", vec![1.0, 0.0, 0.0]),
            EmbeddingRecord::new(2, "Grana Padano DOP", vec![0.0, 1.0, 0.0]),
            EmbeddingRecord::new(3, "Bufala Mozzarella", vec![0.9, 0.1, 0.0]),
        ]
    }

    #[test]
    fn test_new_mirror_is_empty_and_not_ready() {
        let mirror = MemoryMirror::new();
        assert!(mirror.is_empty());
        assert!(!mirror.is_ready());
        assert!(mirror.lookup("grana", None, 0.3, 10).is_empty());
        assert!(mirror.lookup("", Some(&[1.0, 0.0, 0.0]), 0.3, 10).is_empty());
    }

    #[test]
    fn test_load_marks_ready() {
        let mirror = MemoryMirror::new();
        assert_eq!(mirror.load(catalog()), 3);
        assert!(mirror.is_ready());
        assert_eq!(mirror.len(), 3);
    }

    #[test]
    fn test_load_empty_does_not_mark_ready() {
        let mirror = MemoryMirror::new();
        assert_eq!(mirror.load(Vec::new()), 0);
        assert!(!mirror.is_ready());
        mirror.mark_ready();
        assert!(mirror.is_ready());
    }

    #[test]
    fn test_load_is_upsert_per_id() {
        let mirror = MemoryMirror::new();
        mirror.load(catalog());
        mirror.load(vec![EmbeddingRecord::new(2, "Grana Padano Riserva", vec![0.0, 1.0, 0.0])]);

        assert_eq!(mirror.len(), 3);
        let hits = mirror.lookup("riserva", None, 0.0, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, 2);
    }

    #[test]
    fn test_replace_all_drops_previous_content() {
        let mirror = MemoryMirror::new();
        mirror.load(catalog());
        mirror.replace_all(vec![EmbeddingRecord::new(9, "Ricotta", vec![0.0, 0.0, 1.0])]);

        assert_eq!(mirror.len(), 1);
        assert!(mirror.lookup("grana", None, 0.0, 10).is_empty());
    }

    #[test]
    fn test_substring_lookup() {
        let mirror = MemoryMirror::new();
        mirror.load(catalog());

        let hits = mirror.lookup("MOZZARELLA", None, 0.99, 10);
        let ids: Vec<i64> = hits.iter().map(|h| h.entity_id).collect();
        // Ordered by label; the threshold does not apply to substring hits.
        assert_eq!(ids, vec![3, 1]);
        assert!(hits
            .iter()
            .all(|h| (h.similarity - DEFAULT_MEMORY_LEXICAL_SIMILARITY).abs() < f64::EPSILON));
    }

    #[test]
    fn test_substring_lookup_blank_query() {
        let mirror = MemoryMirror::new();
        mirror.load(catalog());
        assert!(mirror.lookup("   ", None, 0.0, 10).is_empty());
    }

    #[test]
    fn test_custom_lexical_similarity() {
        let mirror = MemoryMirror::with_lexical_similarity(0.5);
        mirror.load(catalog());
        let hits = mirror.lookup("grana", None, 0.0, 10);
        assert!((hits[0].similarity - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_vector_lookup_threshold_order_limit() {
        let mirror = MemoryMirror::new();
        mirror.load(catalog());

        let hits = mirror.lookup("ignored", Some(&[1.0, 0.0, 0.0]), 0.3, 10);
        let ids: Vec<i64> = hits.iter().map(|h| h.entity_id).collect();
        assert_eq!(ids, vec![1, 3]);

        let capped = mirror.lookup("ignored", Some(&[1.0, 0.0, 0.0]), 0.3, 1);
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].entity_id, 1);
    }

    #[test]
    fn test_vector_lookup_ties_by_id() {
        let mirror = MemoryMirror::new();
        mirror.load(vec![
            EmbeddingRecord::new(5, "e", vec![1.0, 0.0]),
            EmbeddingRecord::new(2, "b", vec![1.0, 0.0]),
            EmbeddingRecord::new(8, "h", vec![1.0, 0.0]),
        ]);
        let ids: Vec<i64> = mirror
            .lookup("", Some(&[1.0, 0.0]), 0.0, 10)
            .iter()
            .map(|h| h.entity_id)
            .collect();
        assert_eq!(ids, vec![2, 5, 8]);
    }

    #[test]
    fn test_vector_lookup_skips_mismatched_dimensions() {
        let mirror = MemoryMirror::new();
        mirror.load(vec![
            EmbeddingRecord::new(1, "stale", vec![1.0, 0.0, 0.0, 0.0]),
            EmbeddingRecord::new(2, "fresh", vec![1.0, 0.0, 0.0]),
        ]);
        let hits = mirror.lookup("", Some(&[1.0, 0.0, 0.0]), 0.3, 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, 2);
    }

    #[test]
    fn test_clones_share_content() {
        let mirror = MemoryMirror::new();
        let clone = mirror.clone();
        mirror.load(catalog());
        assert_eq!(clone.len(), 3);
        assert!(clone.is_ready());
    }

    #[test]
    fn test_concurrent_loads_do_not_lose_writes() {
        let mirror = MemoryMirror::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let mirror = mirror.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = t * 1000 + i;
                        mirror.load(vec![EmbeddingRecord::new(id, format!("item {}", id), vec![1.0])]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mirror.len(), 400);
    }
}
