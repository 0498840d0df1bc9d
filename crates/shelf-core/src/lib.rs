pub mod config;
pub mod error;
pub mod similarity;
pub mod types;

pub use config::ShelfConfig;
pub use error::{Result, ShelfError};
pub use similarity::cosine_similarity;
pub use types::*;
