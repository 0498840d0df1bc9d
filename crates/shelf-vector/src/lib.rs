//! Shelf vector crate - embedding providers, vector store adapter, in-memory
//! mirror, tiered retrieval, and the batch sync pipeline.

pub mod embedding;
pub mod mirror;
pub mod pipeline;
pub mod search;
pub mod store;

pub use embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OpenAiEmbeddingService, UnavailableEmbedding,
};
pub use mirror::MemoryMirror;
pub use pipeline::SyncPipeline;
pub use search::{RetrievalOrchestrator, SearchOptions, SearchOutcome, Tier};
pub use store::{SqliteVectorStore, VectorStore};
