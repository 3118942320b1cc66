//! HTTP relay module.
//!
//! Accepts chat turns on `/api/chat`, forwards them to the configured text
//! or image provider, and returns JSON or an SSE stream.

mod handlers;
pub mod identity;
mod server;
pub mod stream;
pub mod types;
pub mod upstream;

pub use identity::{resolve_identity, ANONYMOUS_USER};
pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use stream::{spawn_relay, SseData, SseDecoder};
pub use types::{ChatRequest, ChatTurn, ConversationWindow, HistoryEntry, HistoryRole, RelayEvent};
