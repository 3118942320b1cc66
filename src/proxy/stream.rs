//! SSE relay.
//!
//! [`SseDecoder`] reassembles upstream `data:` lines across TCP chunk
//! boundaries. [`spawn_relay`] runs the producer task that decodes an upstream
//! body, forwards each text fragment to the caller as it arrives, and always
//! finishes with exactly one terminal event before closing the channel.

use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::types::{ChatCompletionChunk, GeminiResponse, RelayEvent};
use crate::config::ProviderKind;
use crate::storage::PendingExchange;

/// Longest unterminated line kept before the buffer is discarded.
///
/// The dropped bytes are lost without an event to the caller; decoding
/// resumes at the next newline, so later fragments still arrive. Provider
/// deltas are a few tokens each and never approach this size.
pub(crate) const MAX_LINE_BYTES: usize = 64 * 1024;

/// Outbound events buffered between the producer and the response body.
const RELAY_CHANNEL_CAPACITY: usize = 32;

/// A complete `data:` field from the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Payload(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Line-buffering decoder for newline-delimited SSE.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `[DONE]` has been seen. Later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk of bytes; returns the data fields completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseData> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }

        self.buffer.extend_from_slice(bytes);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line[..line.len() - 1], &mut out);
            if self.done {
                self.buffer.clear();
                return out;
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            tracing::warn!(
                buffered = self.buffer.len(),
                "Discarding oversized unterminated SSE line"
            );
            self.buffer.clear();
        }

        out
    }

    /// Flush whatever is left as a final line (streams may end without `\n`).
    pub fn finish(&mut self) -> Vec<SseData> {
        let mut out = Vec::new();
        if !self.done && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut out);
        }
        out
    }

    fn process_line(&mut self, line: &[u8], out: &mut Vec<SseData>) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Ok(text) = std::str::from_utf8(line) else {
            tracing::debug!("Dropping non-UTF-8 SSE line");
            return;
        };

        // event:, id:, retry: and comment lines carry nothing we relay.
        let Some(data) = text.strip_prefix("data:") else {
            return;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == "[DONE]" {
            self.done = true;
            out.push(SseData::Done);
        } else if !data.is_empty() {
            out.push(SseData::Payload(data.to_string()));
        }
    }
}

/// What one upstream payload contributes to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fragment {
    Text(String),
    Error(String),
    Skip,
}

/// Decode one `data:` payload in the provider's dialect.
///
/// Malformed JSON and payloads without text are skipped, never fatal.
pub(crate) fn decode_payload(kind: ProviderKind, data: &str) -> Fragment {
    let decoded = match kind {
        ProviderKind::OpenAi => serde_json::from_str::<ChatCompletionChunk>(data).map(|chunk| {
            if let Some(message) = chunk.error.as_ref().and_then(|e| e.message()) {
                return Fragment::Error(message.to_string());
            }
            chunk.delta_text().map_or(Fragment::Skip, Fragment::Text)
        }),
        ProviderKind::Gemini => serde_json::from_str::<GeminiResponse>(data).map(|event| {
            if let Some(message) = event.error.as_ref().and_then(|e| e.message()) {
                return Fragment::Error(message.to_string());
            }
            event.into_text().map_or(Fragment::Skip, Fragment::Text)
        }),
    };

    decoded.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Dropping malformed stream payload");
        Fragment::Skip
    })
}

/// Why a relay ended without `done`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RelayError {
    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    #[error("{0}")]
    Provider(String),

    #[error("Client disconnected")]
    ClientGone,
}

/// Start relaying `upstream` to a new caller-facing event stream.
///
/// The spawned task owns the only sender. Fragments are sent in upstream
/// order; then exactly one `Done` or `Error` follows and the sender is
/// dropped, which ends the returned stream. When the relay completes with a
/// non-empty reply, `pending` is handed the full text and persisted in the
/// background before `Done` is sent.
pub fn spawn_relay<S, E>(
    upstream: S,
    kind: ProviderKind,
    pending: Option<PendingExchange>,
) -> ReceiverStream<RelayEvent>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let relayed = AssertUnwindSafe(relay_upstream(upstream, kind, &tx))
            .catch_unwind()
            .await;

        let terminal = match relayed {
            Ok(Ok(reply)) => {
                tracing::info!(reply_chars = reply.chars().count(), "Stream relay complete");
                if let Some(pending) = pending {
                    if !reply.is_empty() {
                        pending.persist_in_background(reply);
                    }
                }
                RelayEvent::Done
            }
            Ok(Err(RelayError::ClientGone)) => {
                tracing::debug!("Caller went away mid-stream, skipping persistence");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Stream relay failed");
                RelayEvent::Error(e.to_string())
            }
            Err(_) => {
                tracing::error!("Stream relay panicked");
                RelayEvent::Error("Internal relay error.".to_string())
            }
        };

        if tx.send(terminal).await.is_err() {
            tracing::debug!("Caller went away before the terminal event");
        }
    });

    ReceiverStream::new(rx)
}

/// Decode `upstream` and forward fragments; returns the accumulated reply.
async fn relay_upstream<S, E>(
    upstream: S,
    kind: ProviderKind,
    tx: &mpsc::Sender<RelayEvent>,
) -> Result<String, RelayError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(upstream);
    let mut decoder = SseDecoder::new();
    let mut reply = String::new();

    while let Some(chunk) = upstream.next().await {
        let bytes = chunk.map_err(|e| RelayError::Interrupted(e.to_string()))?;
        forward(decoder.push(&bytes), kind, &mut reply, tx).await?;
        if decoder.is_done() {
            break;
        }
    }
    forward(decoder.finish(), kind, &mut reply, tx).await?;

    Ok(reply)
}

async fn forward(
    events: Vec<SseData>,
    kind: ProviderKind,
    reply: &mut String,
    tx: &mpsc::Sender<RelayEvent>,
) -> Result<(), RelayError> {
    for event in events {
        let SseData::Payload(data) = event else {
            continue;
        };
        match decode_payload(kind, &data) {
            Fragment::Text(text) => {
                reply.push_str(&text);
                tx.send(RelayEvent::Chunk(text))
                    .await
                    .map_err(|_| RelayError::ClientGone)?;
            }
            Fragment::Error(message) => return Err(RelayError::Provider(message)),
            Fragment::Skip => {}
        }
    }
    Ok(())
}
