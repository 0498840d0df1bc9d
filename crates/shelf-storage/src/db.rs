//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access,
//! configures WAL mode, and registers the SQL functions used by queries:
//! `cosine_similarity(blob, blob)` for vector search and `unicode_lower(text)`
//! for case-insensitive label matching.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use tracing::info;

use shelf_core::error::ShelfError;
use shelf_core::similarity::cosine_similarity;

use crate::migrations;
use crate::repository::decode_vector;

/// Thread-safe SQLite database wrapper.
///
/// The connection is wrapped in a Mutex since rusqlite Connection is not
/// Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, registers SQL functions and
    /// runs all pending migrations.
    pub fn new(path: &Path) -> Result<Self, ShelfError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| ShelfError::Store(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| ShelfError::Store(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::init(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ShelfError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ShelfError::Store(format!("Failed to open in-memory db: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, ShelfError> {
        register_functions(&conn)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ShelfError>
    where
        F: FnOnce(&Connection) -> Result<T, ShelfError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ShelfError::Store(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Register the scalar functions.
///
/// `cosine_similarity(a, b)` works over little-endian f32 blobs. Malformed
/// blobs surface as a query error; mismatched dimensions score 0.
///
/// `unicode_lower(text)` folds case with full Unicode rules, unlike the
/// built-in `lower()` which only folds ASCII.
fn register_functions(conn: &Connection) -> Result<(), ShelfError> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
    .map_err(|e| ShelfError::Store(format!("Failed to register SQL functions: {}", e)))?;

    conn.create_scalar_function(
        "cosine_similarity",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = ctx
                .get_raw(0)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            let b = ctx
                .get_raw(1)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            let a = decode_vector(a).map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            let b = decode_vector(b).map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            Ok(cosine_similarity(&a, &b))
        },
    )
    .map_err(|e| ShelfError::Store(format!("Failed to register SQL functions: {}", e)))
}
