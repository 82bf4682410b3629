//! HTTP transport

pub mod error;
pub mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::core::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/generate", post(routes::generate))
        .route("/title", post(routes::title))
        .route("/summarize", post(routes::summarize))
        .route("/chat/all", get(routes::list_sessions))
        .route("/chat/search", get(routes::search))
        .route(
            "/chat/:session_id",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/chat/:session_id/update", post(routes::update_session))
        .route("/chat/:session_id/rename", post(routes::rename_session))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;
    Ok(())
}
