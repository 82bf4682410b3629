//! Database module

pub mod schema;
pub mod connection;
pub mod repositories;

pub use connection::Database;
pub use repositories::embedding::{EmbeddingRepository, SimilarMessage};
pub use repositories::message::{Message, MessageRepository};
pub use repositories::session::{Session, SessionFilter, SessionRepository};
