//! Route handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::core::state::AppState;
use crate::db::{Session, SessionFilter};
use crate::embedding::SearchHit;
use crate::error::Result;
use crate::llm::Credential;
use crate::session::{ChatRequest, CompletionRequest, Conversation};

type AppStateRef = State<Arc<AppState>>;

/// Buffered fragments between the reconciler and a slow client
const FRAGMENT_BUFFER: usize = 32;

pub async fn health(State(state): AppStateRef) -> (StatusCode, Json<Value>) {
    match state.db.health_check().await {
        Ok(true) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "database unavailable" })),
        ),
    }
}

/// Stream the assistant reply as server-sent events.
///
/// Each fragment is a `message` event with `{"text": ..}`. The stream ends
/// with exactly one `done` event or one `error` event, so a truncated reply
/// is never mistaken for a complete one. Errors found before streaming come
/// back as a JSON error response instead.
pub async fn generate(
    State(state): AppStateRef,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let active = state.reconciler.begin(request).await?;
    let done = json!({
        "session_id": active.session_id(),
        "message_id": active.response_message_id(),
    });

    let (tx, rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);
    let (result_tx, result_rx) = oneshot::channel::<Result<String>>();
    tokio::spawn(async move {
        let _ = result_tx.send(active.run(tx).await);
    });

    let events = futures::stream::unfold(Some((rx, result_rx)), move |phase| {
        let done = done.clone();
        async move {
            let (mut rx, result_rx) = phase?;
            if let Some(fragment) = rx.recv().await {
                let event = Event::default().data(json!({ "text": fragment }).to_string());
                return Some((Ok::<_, Infallible>(event), Some((rx, result_rx))));
            }

            // Sender gone: the reply is stored, report how it ended
            let event = match result_rx.await {
                Ok(Ok(_)) => Event::default().event("done").data(done.to_string()),
                Ok(Err(e)) => {
                    warn!("Reply stream ended with error: {}", e);
                    error_event(&e.to_string())
                }
                Err(_) => error_event("generation task ended unexpectedly"),
            };
            Some((Ok::<_, Infallible>(event), None))
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": message }).to_string())
}

pub async fn title(
    State(state): AppStateRef,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<Value>> {
    let title = state
        .pipeline
        .generate_title(&request.turns(), &request.choice)
        .await?;
    Ok(Json(json!({ "title": title })))
}

pub async fn summarize(
    State(state): AppStateRef,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<Value>> {
    let summary = state
        .pipeline
        .summarize(&request.turns(), &request.choice)
        .await?;
    Ok(Json(json!({ "summary": summary })))
}

pub async fn list_sessions(
    State(state): AppStateRef,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<Session>>> {
    Ok(Json(state.session_manager.list(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_k() -> usize {
    5
}

pub async fn search(
    State(state): AppStateRef,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>> {
    let hits = state
        .search
        .search(
            &params.query,
            params.k,
            params.session_id.as_deref(),
            Credential::from_option(params.api_key),
        )
        .await?;
    Ok(Json(hits))
}

pub async fn get_session(
    State(state): AppStateRef,
    Path(session_id): Path<String>,
) -> Result<Json<Conversation>> {
    Ok(Json(state.session_manager.get_conversation(&session_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct FlagsUpdate {
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub favorite: bool,
}

pub async fn update_session(
    State(state): AppStateRef,
    Path(session_id): Path<String>,
    Json(update): Json<FlagsUpdate>,
) -> Result<Json<Session>> {
    let session = state
        .session_manager
        .update_flags(&session_id, update.archived, update.favorite)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub display_name: String,
}

pub async fn rename_session(
    State(state): AppStateRef,
    Path(session_id): Path<String>,
    Json(rename): Json<RenameRequest>,
) -> Result<Json<Session>> {
    let session = state
        .session_manager
        .rename(&session_id, &rename.display_name)
        .await?;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): AppStateRef,
    Path(session_id): Path<String>,
) -> Result<Json<Value>> {
    state.session_manager.delete(&session_id).await?;
    Ok(Json(json!({ "deleted": session_id })))
}
