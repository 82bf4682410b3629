//! Focal - streaming multi-provider LLM chat backend with persistent sessions

pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod llm;
pub mod server;
pub mod session;

pub use error::{ChatError, Result};
