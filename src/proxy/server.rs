//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    http::{header, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::{Config, ConfigError};
use crate::error::{Error, Result};
use crate::router::RouteClassifier;
use crate::storage::SqlClient;

/// Response header: correlation ID (UUID v4).
pub const REQUEST_ID_HEADER: &str = "x-relay-request-id";

/// Correlation ID attached to each request by middleware.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state. Immutable after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub classifier: Arc<RouteClassifier>,
    /// Present when `store.database_url` resolved.
    pub store: Option<SqlClient>,
}

impl AppState {
    /// Build state with the default outbound HTTP client.
    ///
    /// Only a connect timeout is set: streamed replies may legitimately run
    /// for minutes.
    pub fn new(config: Config) -> Result<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Self::with_client(config, http_client)
    }

    pub fn with_client(config: Config, http_client: Client) -> Result<Self> {
        let store = SqlClient::from_config(http_client.clone(), &config.store).map_err(|e| {
            Error::Config(ConfigError::Validation(format!("store.database_url: {}", e)))
        })?;

        Ok(Self {
            classifier: Arc::new(RouteClassifier::from_config(&config.routing)),
            config: Arc::new(config),
            http_client,
            store,
        })
    }
}

/// Tag each request with a fresh [`RequestId`] and echo it in the response.
async fn inject_request_id(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4();
    request.extensions_mut().insert(RequestId(id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/chat",
            post(handlers::chat).options(handlers::preflight),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Permissive CORS on every response, including errors and preflight.
                .layer(SetResponseHeaderLayer::overriding(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("POST, OPTIONS"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static("Content-Type, Authorization"),
                ))
                .layer(middleware::from_fn(inject_request_id)),
        )
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let state = AppState::new(config)?;
    if state.store.is_none() {
        tracing::info!("No store configured - conversation history will not be persisted");
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chat relay");

    axum::serve(listener, app).await?;

    Ok(())
}
