//! Per-session commit serialization

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per session id; commits for the same session never interleave
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Drop locks nobody holds or waits on
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(session_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
