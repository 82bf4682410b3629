//! Application state

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db::Database;
use crate::embedding::SearchService;
use crate::generation::GenerationPipeline;
use crate::llm::ProviderRouter;
use crate::session::{SessionManager, SessionReconciler};

pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub pipeline: Arc<GenerationPipeline>,
    pub reconciler: SessionReconciler,
    pub session_manager: SessionManager,
    pub search: SearchService,
}

impl AppState {
    /// Wire everything over the real HTTP providers
    pub fn new(db: Database, config: Config) -> Result<Self> {
        let router = ProviderRouter::http(&config.providers)?;
        Ok(Self::with_router(db, config, router))
    }

    /// Wire everything over a custom provider router
    pub fn with_router(db: Database, config: Config, router: ProviderRouter) -> Self {
        let pipeline = Arc::new(GenerationPipeline::new(router.clone(), &config.generation));
        let reconciler = SessionReconciler::new(
            db.clone(),
            Arc::clone(&pipeline),
            &config.generation,
            &config.embedding,
        );
        let session_manager = SessionManager::new(db.clone(), reconciler.locks().clone());
        let search = SearchService::new(db.clone(), router, config.embedding.clone());

        Self {
            db,
            config,
            pipeline,
            reconciler,
            session_manager,
            search,
        }
    }
}
