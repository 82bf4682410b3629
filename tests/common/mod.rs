// Shared stubs for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::sync::mpsc;

use focal::config::Config;
use focal::core::state::AppState;
use focal::db::Database;
use focal::error::Result;
use focal::llm::{
    ClientFactory, EmbeddingClient, FragmentStream, LlmClient, Prompt, ProviderKind,
    ProviderRouter, ProviderSelection, Role, TITLE_INSTRUCTION,
};
use focal::session::ActiveGeneration;

/// What the stub provider does when asked to generate
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fragments: Vec<String>,
    /// Raised after all fragments were emitted
    pub failure: Option<String>,
    /// Never finish after the fragments
    pub stall: bool,
    /// Reply used for title prompts
    pub title: Option<String>,
}

impl Script {
    pub fn reply(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing(fragments: &[&str], failure: &str) -> Self {
        Self {
            failure: Some(failure.to_string()),
            ..Self::reply(fragments)
        }
    }

    pub fn stalling(fragments: &[&str]) -> Self {
        Self {
            stall: true,
            ..Self::reply(fragments)
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub generations: Arc<AtomicUsize>,
    pub title_requests: Arc<AtomicUsize>,
    pub embeddings: Arc<AtomicUsize>,
    pub selections: Arc<Mutex<Vec<ProviderSelection>>>,
}

impl Counters {
    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn title_requests(&self) -> usize {
        self.title_requests.load(Ordering::SeqCst)
    }

    pub fn embeddings(&self) -> usize {
        self.embeddings.load(Ordering::SeqCst)
    }

    pub fn last_selection(&self) -> Option<ProviderSelection> {
        self.selections.lock().unwrap().last().cloned()
    }
}

pub struct StubClient {
    kind: ProviderKind,
    model: String,
    script: Script,
    counters: Counters,
}

#[async_trait]
impl LlmClient for StubClient {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> anyhow::Result<FragmentStream> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);

        let is_title = prompt
            .entries
            .first()
            .map_or(false, |e| e.role == Role::System && e.content == TITLE_INSTRUCTION);
        if is_title {
            self.counters.title_requests.fetch_add(1, Ordering::SeqCst);
            let title = self.script.title.clone().unwrap_or_default();
            return Ok(Box::pin(futures::stream::iter(vec![Ok::<_, anyhow::Error>(title)])));
        }

        let mut items: Vec<anyhow::Result<String>> =
            self.script.fragments.iter().cloned().map(Ok).collect();
        if let Some(failure) = &self.script.failure {
            items.push(Err(anyhow::anyhow!("{}", failure)));
        }

        let fragments = futures::stream::iter(items);
        if self.script.stall {
            Ok(Box::pin(fragments.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(fragments))
        }
    }
}

/// Three-dimensional vectors keyed on a couple of words
pub struct StubEmbedder {
    kind: ProviderKind,
    counters: Counters,
}

pub fn stub_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    vec![
        if text.contains("rust") { 1.0 } else { 0.0 },
        if text.contains("python") { 1.0 } else { 0.0 },
        0.1,
    ]
}

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        "stub-embed"
    }

    async fn embed(&self, inputs: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.counters.embeddings.fetch_add(1, Ordering::SeqCst);
        if inputs.iter().any(|i| i.contains("explode")) {
            anyhow::bail!("embedding backend unavailable");
        }
        Ok(inputs.iter().map(|i| stub_vector(i)).collect())
    }
}

pub struct StubFactory {
    pub script: Script,
    pub counters: Counters,
}

impl ClientFactory for StubFactory {
    fn chat_client(&self, selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>> {
        self.counters.selections.lock().unwrap().push(selection.clone());
        Ok(Arc::new(StubClient {
            kind: selection.kind,
            model: selection
                .variant
                .clone()
                .unwrap_or_else(|| "stub-model".to_string()),
            script: self.script.clone(),
            counters: self.counters.clone(),
        }))
    }

    fn embedding_client(&self, selection: &ProviderSelection) -> Result<Arc<dyn EmbeddingClient>> {
        Ok(Arc::new(StubEmbedder {
            kind: selection.kind,
            counters: self.counters.clone(),
        }))
    }
}

pub fn stub_router(script: Script) -> (ProviderRouter, Counters) {
    let counters = Counters::default();
    let factory = StubFactory {
        script,
        counters: counters.clone(),
    };
    (ProviderRouter::new(Arc::new(factory)), counters)
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub counters: Counters,
    _temp: TempDir,
}

pub fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(db_path).unwrap();
    (db, temp_dir)
}

pub fn harness(script: Script) -> Harness {
    harness_with(script, Config::default())
}

pub fn harness_with(script: Script, config: Config) -> Harness {
    let (db, temp) = create_test_db();
    let (router, counters) = stub_router(script);
    Harness {
        state: Arc::new(AppState::with_router(db, config, router)),
        counters,
        _temp: temp,
    }
}

/// Run a generation to completion, collecting what the client would see
pub async fn drive(active: ActiveGeneration) -> (Vec<String>, Result<String>) {
    let (tx, mut rx) = mpsc::channel(16);
    let handle = tokio::spawn(active.run(tx));

    let mut received = Vec::new();
    while let Some(fragment) = rx.recv().await {
        received.push(fragment);
    }
    (received, handle.await.unwrap())
}
