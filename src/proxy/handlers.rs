//! HTTP request handlers.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{Extension, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;

use super::identity::resolve_identity;
use super::server::{AppState, RequestId};
use super::stream::spawn_relay;
use super::types::{ChatRequest, ChatTurn, ConversationWindow, ImageReply};
use super::upstream;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::router::Route;
use crate::storage::PendingExchange;

/// Handle POST /api/chat
///
/// The body is decoded as JSON whatever its `Content-Type`: browsers posting
/// `text/plain` skip the CORS preflight and must still be served.
pub async fn chat(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Response> {
    let request: ChatRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(
            request_id = %request_id.0,
            error = %e,
            "Rejected malformed chat request"
        );
        Error::BadRequest("Invalid request body.".to_string())
    })?;

    let stream = request.stream.unwrap_or(state.config.chat.stream);
    let turn = ChatTurn::try_from(request)?;
    let route = state.classifier.classify(&turn.message);

    tracing::info!(
        request_id = %request_id.0,
        route = route.as_str(),
        stream,
        session_id = ?turn.session_id,
        history_len = turn.history.len(),
        "Received chat request"
    );

    ensure_configured(&state.config, route)?;

    let result = match route {
        Route::Image => image_reply(&state, turn).await,
        Route::Text if stream => stream_reply(&state, turn).await,
        Route::Text => text_reply(&state, turn).await,
    };

    if let Err(e) = &result {
        tracing::warn!(request_id = %request_id.0, error = %e, "Chat request failed");
    }
    result
}

/// Fail fast, before any outbound call, when the route has no credentials.
fn ensure_configured(config: &Config, route: Route) -> Result<()> {
    match route {
        Route::Image if config.image.api_key.is_none() => Err(Error::ImageUnavailable),
        Route::Text if config.chat.api_key.is_none() => Err(Error::MissingCredential(format!(
            "{} API key",
            config.chat.provider_name()
        ))),
        _ => Ok(()),
    }
}

/// Persistence target for this turn, when both a store and a session exist.
fn pending_exchange(state: &AppState, turn: &ChatTurn, user_id: String) -> Option<PendingExchange> {
    let store = state.store.clone()?;
    let session_id = turn.session_id.clone()?;
    Some(PendingExchange::new(
        store,
        session_id,
        user_id,
        turn.message.clone(),
    ))
}

fn window_for(config: &Config, turn: &ChatTurn) -> ConversationWindow {
    ConversationWindow::build(
        &config.chat.system_prompt,
        &turn.history,
        config.chat.history_limit,
        &turn.message,
    )
}

/// Buffered text completion: `{"reply": "..."}`.
async fn text_reply(state: &AppState, turn: ChatTurn) -> Result<Response> {
    let user_id = resolve_identity(&state.http_client, &state.config.auth, turn.token.as_deref()).await;
    let window = window_for(&state.config, &turn);

    let reply = upstream::complete(&state.http_client, &state.config.chat, &window).await?;

    if let Some(pending) = pending_exchange(state, &turn, user_id) {
        pending.persist_in_background(reply.clone());
    }

    Ok(Json(serde_json::json!({ "reply": reply })).into_response())
}

/// Streamed text completion relayed as `data: {...}` events.
async fn stream_reply(state: &AppState, turn: ChatTurn) -> Result<Response> {
    let user_id = resolve_identity(&state.http_client, &state.config.auth, turn.token.as_deref()).await;
    let window = window_for(&state.config, &turn);

    let upstream_response =
        upstream::open_stream(&state.http_client, &state.config.chat, &window).await?;

    let events = spawn_relay(
        upstream_response.bytes_stream(),
        state.config.chat.kind,
        pending_exchange(state, &turn, user_id),
    );
    let body = events.map(|event| Ok::<_, Infallible>(Event::default().data(event.payload())));

    Ok(Sse::new(body).into_response())
}

/// Image generation: `{"type": "image", "image": "<base64>", "prompt": "..."}`.
async fn image_reply(state: &AppState, turn: ChatTurn) -> Result<Response> {
    let user_id = resolve_identity(&state.http_client, &state.config.auth, turn.token.as_deref()).await;

    let image = upstream::generate_image(&state.http_client, &state.config.image, &turn.message).await?;

    if let Some(pending) = pending_exchange(state, &turn, user_id) {
        pending.persist_in_background(state.config.image.placeholder.clone());
    }

    Ok(Json(ImageReply {
        kind: "image",
        image,
        prompt: turn.message,
    })
    .into_response())
}

/// Handle OPTIONS /api/chat (CORS headers come from the router layers).
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chat-relay"
    }))
}
