//! Embedding augmentation: chunking, vectorization and semantic search

pub mod bridge;
pub mod search;
pub mod splitter;

pub use bridge::EmbeddingBridge;
pub use search::{SearchHit, SearchService};
pub use splitter::TextSplitter;
