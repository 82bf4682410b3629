//! Session module: reconciliation of chat turns and session management

pub mod locks;
pub mod manager;
pub mod reconciler;
pub mod request;
pub mod title;

pub use locks::SessionLocks;
pub use manager::{Conversation, SessionManager};
pub use reconciler::{ActiveGeneration, SessionReconciler};
pub use request::{ChatRequest, CompletionRequest, IncomingMessage};
pub use title::quoted_title;
