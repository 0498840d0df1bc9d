//! Shelf Storage crate - SQLite persistence for product embeddings.
//!
//! Provides a WAL-mode SQLite database with migrations, a registered
//! `cosine_similarity` SQL function, and the embedding repository.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{decode_vector, encode_vector, EmbeddingRepository};
