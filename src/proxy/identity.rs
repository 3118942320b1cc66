//! Optional bearer-token verification.

use reqwest::{header, Client};
use serde::Deserialize;

use crate::config::AuthConfig;

/// User id recorded when no verified identity is available.
pub const ANONYMOUS_USER: &str = "guest";

#[derive(Debug, Default, Deserialize)]
struct VerifyResponse {
    sub: Option<String>,
    user_id: Option<String>,
}

impl VerifyResponse {
    fn into_user_id(self) -> Option<String> {
        self.sub
            .filter(|s| !s.is_empty())
            .or(self.user_id.filter(|s| !s.is_empty()))
    }
}

/// Resolve the caller's user id.
///
/// Never fails: without a configured verifier, without a token, or on any
/// verification problem the result is [`ANONYMOUS_USER`].
pub async fn resolve_identity(http: &Client, auth: &AuthConfig, token: Option<&str>) -> String {
    let (Some(secret), Some(token)) = (auth.secret_key.as_ref(), token) else {
        return ANONYMOUS_USER.to_string();
    };

    let response = http
        .post(&auth.verify_url)
        .header(header::CONTENT_TYPE, "application/json")
        .bearer_auth(secret.expose_secret())
        .json(&serde_json::json!({ "token": token }))
        .send()
        .await;

    let response = match response {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::warn!(status = %response.status(), "Token verification rejected");
            return ANONYMOUS_USER.to_string();
        }
        Err(e) => {
            tracing::warn!(error = %e, "Token verification failed");
            return ANONYMOUS_USER.to_string();
        }
    };

    match response.json::<VerifyResponse>().await {
        Ok(verified) => verified.into_user_id().unwrap_or_else(|| {
            tracing::warn!("Token verification response carried no user id");
            ANONYMOUS_USER.to_string()
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Token verification response unreadable");
            ANONYMOUS_USER.to_string()
        }
    }
}
