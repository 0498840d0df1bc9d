//! SQLite-backed persistence for product embeddings.
//!
//! One row per entity, upserted on resync. Vector similarity is computed in
//! SQL through the `cosine_similarity` function registered by [`Database`].

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;

use shelf_core::error::ShelfError;
use shelf_core::types::{EmbeddingRecord, QueryResult};

use crate::db::Database;

/// Serialize a vector as little-endian f32 bytes.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize a little-endian f32 blob.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, ShelfError> {
    if bytes.len() % 4 != 0 {
        return Err(ShelfError::Store(format!(
            "Corrupt vector blob: {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Escape LIKE wildcards so the query is matched literally.
fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Convert a limit for binding; values beyond `i64::MAX` saturate, since a
/// negative LIMIT means "unbounded" to SQLite.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Repository for the `product_embeddings` table.
#[derive(Debug, Clone)]
pub struct EmbeddingRepository {
    db: Arc<Database>,
}

impl EmbeddingRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the embedding for `record.entity_id`.
    ///
    /// Fails with [`ShelfError::DimensionMismatch`] when any *other* stored
    /// vector has a different length.
    pub fn upsert(&self, record: &EmbeddingRecord) -> Result<(), ShelfError> {
        if record.vector.is_empty() {
            return Err(ShelfError::Store(format!(
                "Refusing to store empty vector for entity {}",
                record.entity_id
            )));
        }

        self.db.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT dimension FROM product_embeddings WHERE entity_id != ?1 LIMIT 1",
                    rusqlite::params![record.entity_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            if let Some(expected) = existing {
                let expected = expected as usize;
                if expected != record.vector.len() {
                    return Err(ShelfError::DimensionMismatch {
                        expected,
                        actual: record.vector.len(),
                    });
                }
            }

            conn.execute(
                "INSERT INTO product_embeddings (entity_id, label, vector, dimension, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(entity_id) DO UPDATE SET
                    label = excluded.label,
                    vector = excluded.vector,
                    dimension = excluded.dimension,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    record.entity_id,
                    record.label,
                    encode_vector(&record.vector),
                    record.vector.len() as i64,
                    record.updated_at.timestamp(),
                ],
            )
            .map_err(|e| ShelfError::Store(format!("Failed to upsert embedding: {}", e)))?;
            Ok(())
        })
    }

    /// Entities whose similarity to `query` strictly exceeds `threshold`,
    /// best first, ties by ascending id, at most `limit`.
    pub fn query(
        &self,
        query: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<QueryResult>, ShelfError> {
        let blob = encode_vector(query);
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_id, label, similarity FROM (
                        SELECT entity_id, label, cosine_similarity(vector, ?1) AS similarity
                        FROM product_embeddings
                     )
                     WHERE similarity > ?2
                     ORDER BY similarity DESC, entity_id ASC
                     LIMIT ?3",
                )
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![blob, threshold, sql_limit(limit)], |row| {
                    Ok(QueryResult {
                        entity_id: row.get(0)?,
                        label: row.get(1)?,
                        similarity: row.get(2)?,
                    })
                })
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ShelfError::Store(format!("Vector query failed: {}", e)))
        })
    }

    /// Case-insensitive substring match on the label, ordered by label.
    ///
    /// Every hit carries the constant `similarity`; it is not a real score.
    pub fn lexical_query(
        &self,
        substring: &str,
        limit: usize,
        similarity: f64,
    ) -> Result<Vec<QueryResult>, ShelfError> {
        let pattern = escape_like(&substring.to_lowercase());
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_id, label FROM product_embeddings
                     WHERE unicode_lower(label) LIKE '%' || ?1 || '%' ESCAPE '\\'
                     ORDER BY label ASC, entity_id ASC
                     LIMIT ?2",
                )
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![pattern, sql_limit(limit)], |row| {
                    Ok(QueryResult {
                        entity_id: row.get(0)?,
                        label: row.get(1)?,
                        similarity,
                    })
                })
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ShelfError::Store(format!("Lexical query failed: {}", e)))
        })
    }

    /// Find the embedding stored for an entity.
    pub fn find_by_id(&self, entity_id: i64) -> Result<Option<EmbeddingRecord>, ShelfError> {
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT entity_id, label, vector, updated_at
                     FROM product_embeddings WHERE entity_id = ?1",
                    rusqlite::params![entity_id],
                    raw_record,
                )
                .optional()
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            row.map(into_record).transpose()
        })
    }

    /// Load every stored embedding, ordered by entity id.
    pub fn load_all(&self) -> Result<Vec<EmbeddingRecord>, ShelfError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT entity_id, label, vector, updated_at
                     FROM product_embeddings ORDER BY entity_id ASC",
                )
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            let rows = stmt
                .query_map([], raw_record)
                .map_err(|e| ShelfError::Store(e.to_string()))?;

            let mut records = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| ShelfError::Store(e.to_string()))?;
                records.push(into_record(raw)?);
            }
            Ok(records)
        })
    }

    /// Count stored embeddings.
    pub fn count(&self) -> Result<u64, ShelfError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM product_embeddings", [], |row| {
                    row.get(0)
                })
                .map_err(|e| ShelfError::Store(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// The vector dimension fixed by the stored rows, if any.
    pub fn dimension(&self) -> Result<Option<usize>, ShelfError> {
        self.db.with_conn(|conn| {
            let dim: Option<i64> = conn
                .query_row("SELECT dimension FROM product_embeddings LIMIT 1", [], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(|e| ShelfError::Store(e.to_string()))?;
            Ok(dim.map(|d| d as usize))
        })
    }
}

type RawRecord = (i64, String, Vec<u8>, i64);

fn raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_record((entity_id, label, blob, updated_at): RawRecord) -> Result<EmbeddingRecord, ShelfError> {
    let updated_at: DateTime<Utc> = Utc
        .timestamp_opt(updated_at, 0)
        .single()
        .ok_or_else(|| ShelfError::Store(format!("Invalid timestamp: {}", updated_at)))?;

    Ok(EmbeddingRecord {
        entity_id,
        label,
        vector: decode_vector(&blob)?,
        updated_at,
    })
}
