//! Streaming generation over the selected provider

pub mod pipeline;

pub use pipeline::{GenerationPipeline, GenerationStream, ModelChoice};
