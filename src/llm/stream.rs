//! Line framing for streamed provider responses (NDJSON and SSE)

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{Stream, StreamExt};

/// Splits a byte stream into lines, tolerating lines split across chunks
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every line it completed, without terminators
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(Self::to_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Whatever is left once the stream ended without a final newline
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(Self::to_line(&raw))
    }

    fn to_line(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

/// Fail with status and body text unless the provider answered 2xx
pub async fn ensure_success(
    response: reqwest::Response,
    provider: &str,
) -> anyhow::Result<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{} API error: {} - {}", provider, status, body);
    }
    Ok(response)
}

/// Payload of an SSE `data:` line
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

struct LineState<S> {
    inner: S,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Adapt a response body into a stream of non-empty lines
pub fn decode_lines<S, E>(body: S) -> impl Stream<Item = anyhow::Result<String>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Into<anyhow::Error> + Send + 'static,
{
    let state = LineState {
        inner: body,
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let lines = state.decoder.push(&chunk);
                    state.pending.extend(lines.into_iter().filter(|l| !l.trim().is_empty()));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.finished = true;
                    if let Some(rest) = state.decoder.finish().filter(|l| !l.trim().is_empty()) {
                        state.pending.push_back(rest);
                    }
                }
            }
        }
    })
}
