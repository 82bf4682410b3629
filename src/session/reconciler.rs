//! Session reconciliation.
//!
//! A chat turn moves through `NoSession -> SessionLoaded -> MessagesReconciled
//! -> StreamingAssistant -> Persisted | Failed`. [`SessionReconciler::begin`]
//! covers everything up to `MessagesReconciled` in one transaction and hands
//! back an [`ActiveGeneration`]; [`ActiveGeneration::run`] streams the reply
//! and commits the assistant message, complete or partial.
//!
//! Commits for one session are serialized through [`SessionLocks`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::locks::SessionLocks;
use super::request::ChatRequest;
use super::title::quoted_title;
use crate::config::{EmbeddingConfig, GenerationConfig};
use crate::db::repositories::embedding::EmbeddingRepository;
use crate::db::{Database, Message, MessageRepository, Session, SessionRepository};
use crate::embedding::EmbeddingBridge;
use crate::error::{ChatError, Result};
use crate::generation::{GenerationPipeline, GenerationStream};
use crate::llm::{PromptBuilder, ProviderKind, Role};

/// Outcome of the reconciliation transaction
struct Reconciled {
    created: bool,
    message_count: usize,
}

pub struct SessionReconciler {
    db: Database,
    pipeline: Arc<GenerationPipeline>,
    locks: SessionLocks,
    title_threshold: usize,
    embedding: EmbeddingConfig,
}

impl SessionReconciler {
    pub fn new(
        db: Database,
        pipeline: Arc<GenerationPipeline>,
        generation: &GenerationConfig,
        embedding: &EmbeddingConfig,
    ) -> Self {
        Self {
            db,
            pipeline,
            locks: SessionLocks::new(),
            title_threshold: generation.title_threshold,
            embedding: embedding.clone(),
        }
    }

    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Validate the request, reconcile inbound messages and prepare the reply stream.
    ///
    /// Malformed messages leave the store untouched. Provider selection runs
    /// after the inbound messages are committed, so a `Configuration` error
    /// keeps them and creates no assistant row.
    pub async fn begin(&self, request: ChatRequest) -> Result<ActiveGeneration> {
        validate_ids(&request)?;

        let turns = request.turns();
        PromptBuilder::build(&turns, request.topic.as_ref()).map_err(ChatError::configuration)?;

        let reconciled = {
            let _guard = self.locks.lock(&request.session_id).await;
            self.reconcile(&request).await?
        };

        debug!(
            "Reconciled session {}: {} messages (created: {})",
            request.session_id, reconciled.message_count, reconciled.created
        );

        let stream = self
            .pipeline
            .stream(&turns, &request.choice, request.topic.as_ref())?;

        let unnamed = request
            .session_name
            .as_deref()
            .map_or(true, |name| name.trim().is_empty());
        if reconciled.created && unnamed {
            self.assign_title(&request, reconciled.message_count).await;
        }

        let embedder = self.embedder(&request);

        Ok(ActiveGeneration {
            writer: ReplyWriter {
                db: self.db.clone(),
                locks: self.locks.clone(),
                session_id: request.session_id,
                response_message_id: request.response_message_id,
                embedder,
            },
            stream,
        })
    }

    async fn reconcile(&self, request: &ChatRequest) -> Result<Reconciled> {
        let session_id = request.session_id.as_str();

        self.db
            .transaction(|tx| {
                let created = match SessionRepository::fetch(tx, session_id)? {
                    Some(_) => false,
                    None => {
                        let session = Session::new(session_id, request.session_name.clone());
                        SessionRepository::insert(tx, &session)?;
                        info!("Created session {} ({})", session_id, session.display_name);
                        true
                    }
                };

                for incoming in &request.messages {
                    let (Some(message_id), Some(role), Some(content)) = (
                        incoming.message_id.as_deref(),
                        incoming.role.as_deref(),
                        incoming.content.as_deref(),
                    ) else {
                        continue;
                    };
                    let role = Role::from_str(role)?;
                    // System entries shape the prompt only
                    if role == Role::System {
                        continue;
                    }
                    let message = Message::new(session_id, message_id, role, content);
                    MessageRepository::upsert(tx, &message)?;
                }

                let message_count = MessageRepository::count(tx, session_id)?;
                Ok(Reconciled {
                    created,
                    message_count,
                })
            })
            .await
            .map_err(ChatError::store)
    }

    /// Best effort; failures keep the current display name
    async fn assign_title(&self, request: &ChatRequest, message_count: usize) {
        let title = if message_count < self.title_threshold {
            let first_user = request
                .messages
                .iter()
                .find(|m| m.role.as_deref() == Some(Role::User.as_str()))
                .and_then(|m| m.content.as_deref());
            match first_user.and_then(quoted_title) {
                Some(title) => title,
                None => {
                    debug!("No quoted title in session {}", request.session_id);
                    return;
                }
            }
        } else {
            match self
                .pipeline
                .generate_title(&request.turns(), &request.choice)
                .await
            {
                Ok(title) => title,
                Err(e) => {
                    warn!("Title generation failed for {}: {}", request.session_id, e);
                    return;
                }
            }
        };

        let _guard = self.locks.lock(&request.session_id).await;
        let conn = self.db.lock().await;
        match SessionRepository::set_display_name(&conn, &request.session_id, &title) {
            Ok(_) => info!("Titled session {}: {}", request.session_id, title),
            Err(e) => warn!("Failed to store title for {}: {:#}", request.session_id, e),
        }
    }

    fn embedder(&self, request: &ChatRequest) -> Option<EmbeddingBridge> {
        if !self.embedding.enabled {
            return None;
        }

        let request_kind = ProviderKind::resolve(request.choice.model.as_deref());
        let credential = request.choice.credential().map(|c| (request_kind, c));
        match EmbeddingBridge::from_config(self.pipeline.router(), &self.embedding, credential) {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                warn!("Embeddings disabled for this reply: {}", e);
                None
            }
        }
    }
}

fn validate_ids(request: &ChatRequest) -> Result<()> {
    if request.session_id.trim().is_empty() {
        return Err(ChatError::InvalidMessage("session_id is required".to_string()));
    }
    if request.response_message_id.trim().is_empty() {
        return Err(ChatError::InvalidMessage(
            "response_message_id must not be empty".to_string(),
        ));
    }
    for (index, incoming) in request.messages.iter().enumerate() {
        let valid = incoming
            .message_id
            .as_deref()
            .map_or(false, |id| !id.trim().is_empty());
        if !valid && incoming.role.as_deref() != Some(Role::System.as_str()) {
            return Err(ChatError::InvalidMessage(format!(
                "message {} has no message_id",
                index
            )));
        }
    }
    Ok(())
}

/// A reconciled turn whose assistant reply has not been produced yet
pub struct ActiveGeneration {
    writer: ReplyWriter,
    stream: GenerationStream,
}

/// Everything needed to commit the reply once the stream is gone
struct ReplyWriter {
    db: Database,
    locks: SessionLocks,
    session_id: String,
    response_message_id: String,
    embedder: Option<EmbeddingBridge>,
}

impl ActiveGeneration {
    pub fn session_id(&self) -> &str {
        &self.writer.session_id
    }

    pub fn response_message_id(&self) -> &str {
        &self.writer.response_message_id
    }

    /// Cancelling stops the provider and takes the partial-persist path
    pub fn cancellation_token(&self) -> CancellationToken {
        self.stream.cancellation_token()
    }

    /// Forward fragments to `sink` and persist the reply.
    ///
    /// Returns the full text. A dropped receiver counts as a client
    /// disconnect: the provider is cancelled and the partial text is stored
    /// before `GenerationInterrupted` is returned.
    pub async fn run(self, sink: mpsc::Sender<String>) -> Result<String> {
        let ActiveGeneration { writer, mut stream } = self;
        let cancel = stream.cancellation_token();

        let outcome = loop {
            let next = if cancel.is_cancelled() {
                stream.next().await
            } else {
                tokio::select! {
                    biased;
                    _ = sink.closed() => {
                        debug!("Client left session {} mid-stream", writer.session_id);
                        cancel.cancel();
                        continue;
                    }
                    next = stream.next() => next,
                }
            };

            match next {
                Some(Ok(fragment)) => {
                    if sink.send(fragment).await.is_err() {
                        cancel.cancel();
                    }
                }
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            }
        };
        let text = stream.into_text();

        match outcome {
            Ok(()) => {
                let embedding = writer.embed(&text).await;
                writer
                    .persist(&text, embedding.as_deref())
                    .await
                    .map_err(ChatError::store)?;
                info!(
                    "Stored reply {} in session {} ({} bytes)",
                    writer.response_message_id,
                    writer.session_id,
                    text.len()
                );
                Ok(text)
            }
            Err(ChatError::GenerationInterrupted { partial, reason }) => {
                if let Err(e) = writer.persist(&partial, None).await {
                    error!(
                        "Failed to store partial reply {} in session {}: {:#}",
                        writer.response_message_id, writer.session_id, e
                    );
                }
                Err(ChatError::GenerationInterrupted { partial, reason })
            }
            Err(other) => Err(other),
        }
    }
}

impl ReplyWriter {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let bridge = self.embedder.as_ref()?;
        match bridge.embed(text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(
                    "Storing reply {} without embedding: {}",
                    self.response_message_id, e
                );
                None
            }
        }
    }

    async fn persist(&self, content: &str, embedding: Option<&[f32]>) -> anyhow::Result<()> {
        let _guard = self.locks.lock(&self.session_id).await;
        let message = Message::new(
            &self.session_id,
            &self.response_message_id,
            Role::Assistant,
            content,
        );

        self.db
            .transaction(|tx| {
                MessageRepository::upsert(tx, &message)?;
                if let Some(vector) = embedding {
                    EmbeddingRepository::upsert(
                        tx,
                        &message.session_id,
                        &message.message_id,
                        vector,
                    )?;
                }
                Ok(())
            })
            .await
    }
}
