//! Error types for chat-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the relay.
///
/// Every variant maps to one HTTP status and is rendered as `{"error": "..."}`.
/// Persistence and identity failures never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("{0} is not configured.")]
    MissingCredential(String),

    #[error("Image generation is not configured.")]
    ImageUnavailable,

    /// Provider-supplied or synthesized message, passed through verbatim.
    #[error("{0}")]
    Upstream(String),

    #[error("Empty response from {0}.")]
    EmptyResponse(String),

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    BadRequest(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::MissingCredential(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ImageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::EmptyResponse(_) => StatusCode::BAD_GATEWAY,
            Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::BadRequest("Message is required.".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::MissingCredential("OpenRouter API key".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::ImageUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Upstream("quota exceeded".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::EmptyResponse("OpenRouter".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_message_passes_through_verbatim() {
        assert_eq!(Error::Upstream("X".into()).to_string(), "X");
    }

    #[tokio::test]
    async fn test_into_response_body_shape() {
        let response = Error::EmptyResponse("Gemini".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Empty response from Gemini."}));
    }
}
