//! Database schema migrations.
//!
//! Applies the product_embeddings schema and tracks applied versions in
//! schema_migrations.

use rusqlite::Connection;
use tracing::info;

use shelf_core::error::ShelfError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ShelfError::Store(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ShelfError::Store(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: product_embeddings");
    }

    Ok(())
}

/// Version 1: one embedding row per catalog entity.
///
/// `vector` holds little-endian f32 values; `dimension` is kept alongside so
/// the uniform-dimension invariant can be checked without decoding blobs.
fn apply_v1(conn: &Connection) -> Result<(), ShelfError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS product_embeddings (
            entity_id   INTEGER PRIMARY KEY NOT NULL,
            label       TEXT NOT NULL,
            vector      BLOB NOT NULL,
            dimension   INTEGER NOT NULL CHECK (dimension > 0),
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_product_embeddings_label
            ON product_embeddings (label);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'product_embeddings');
        ",
    )
    .map_err(|e| ShelfError::Store(format!("Migration v1 failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_schema_rejects_zero_dimension() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO product_embeddings (entity_id, label, vector, dimension)
             VALUES (1, 'x', x'', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
