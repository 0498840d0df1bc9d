//! Cosine similarity and deterministic ranking.
//!
//! Shared by the SQLite store (registered as a SQL function) and the
//! in-memory mirror, so both tiers score vectors identically.

use std::cmp::Ordering;

use crate::types::QueryResult;

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 when the lengths differ or either vector has zero magnitude.
/// A mismatched vector usually comes from a stale entry and should rank
/// last instead of aborting the query.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a.sqrt() * mag_b.sqrt())).clamp(-1.0, 1.0)
}

/// Order results by descending similarity, ties by ascending entity id.
pub fn compare_ranked(a: &QueryResult, b: &QueryResult) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.entity_id.cmp(&b.entity_id))
}

/// Keep candidates strictly above `threshold`, sort them, cap at `limit`.
pub fn rank(mut candidates: Vec<QueryResult>, threshold: f64, limit: usize) -> Vec<QueryResult> {
    candidates.retain(|c| c.similarity > threshold);
    candidates.sort_by(compare_ranked);
    candidates.truncate(limit);
    candidates
}
