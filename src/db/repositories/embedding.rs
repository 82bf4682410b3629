//! Message embedding repository (vector store)
//!
//! Vectors are stored as little-endian `f32` blobs next to the message they
//! describe. Similarity search is a brute-force cosine scan, which is fine
//! for a single-user conversation store.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::Database;

/// One similarity search hit
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimilarMessage {
    pub session_id: String,
    pub message_id: String,
    pub score: f32,
}

pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0.0 when either side is zero or dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub struct EmbeddingRepository {
    db: Database,
}

impl EmbeddingRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Attach (or replace) the vector of an existing message
    pub fn upsert(conn: &Connection, session_id: &str, message_id: &str, vector: &[f32]) -> Result<()> {
        conn.execute(
            "INSERT INTO message_embeddings (session_id, message_id, dimensions, vector)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id, message_id)
             DO UPDATE SET dimensions = excluded.dimensions, vector = excluded.vector",
            params![session_id, message_id, vector.len() as i64, encode_vector(vector)],
        )
        .with_context(|| format!("Failed to store embedding for message {}", message_id))?;
        Ok(())
    }

    pub async fn upsert_embedding(&self, session_id: &str, message_id: &str, vector: &[f32]) -> Result<()> {
        let conn = self.db.lock().await;
        Self::upsert(&conn, session_id, message_id, vector)
    }

    /// Top-`k` messages by cosine similarity to `query`, best first
    pub async fn similarity_search(
        &self,
        query: &[f32],
        k: usize,
        session_id: Option<&str>,
    ) -> Result<Vec<SimilarMessage>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(
            "SELECT session_id, message_id, vector FROM message_embeddings
             WHERE dimensions = ?1 AND (?2 IS NULL OR session_id = ?2)",
        )?;

        let rows = stmt.query_map(params![query.len() as i64, session_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (session_id, message_id, bytes) = row.context("Failed to read embedding")?;
            let score = cosine_similarity(query, &decode_vector(&bytes));
            hits.push(SimilarMessage {
                session_id,
                message_id,
                score,
            });
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }
}
