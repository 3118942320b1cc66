//! Best-effort persistence of chat exchanges.

use super::{SqlClient, StoreError};

const CREATE_SESSIONS: &str = "CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT DEFAULT 'guest',
    title TEXT,
    created_at TIMESTAMPTZ DEFAULT NOW(),
    updated_at TIMESTAMPTZ DEFAULT NOW()
)";

const CREATE_MESSAGES: &str = "CREATE TABLE IF NOT EXISTS messages (
    id SERIAL PRIMARY KEY,
    session_id TEXT REFERENCES sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMPTZ DEFAULT NOW()
)";

// Title and owner are fixed by the first turn; later turns only touch updated_at.
const UPSERT_SESSION: &str = "INSERT INTO sessions (id, user_id, title, updated_at)
    VALUES ($1, $2, $3, NOW())
    ON CONFLICT (id) DO UPDATE SET updated_at = NOW()";

const INSERT_MESSAGES: &str = "INSERT INTO messages (session_id, role, content)
    VALUES ($1, 'user', $2), ($1, 'model', $3)";

const TITLE_CHARS: usize = 60;

/// Session title: the first 60 characters of the message, `…` if cut.
pub fn session_title(message: &str) -> String {
    let mut chars = message.chars();
    let mut title: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        title.push('…');
    }
    title
}

/// One completed user/assistant exchange.
///
/// All fields are owned to satisfy the `tokio::spawn` `'static` requirement.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub session_id: String,
    pub user_id: String,
    pub user_message: String,
    pub reply: String,
}

impl Exchange {
    /// Ensure the schema, upsert the session, and append both messages.
    ///
    /// Each statement is its own request; a failure part-way leaves the
    /// earlier writes in place.
    pub async fn persist(&self, store: &SqlClient) -> Result<(), StoreError> {
        store.execute(CREATE_SESSIONS, &[]).await?;
        store.execute(CREATE_MESSAGES, &[]).await?;
        store
            .execute(
                UPSERT_SESSION,
                &[
                    self.session_id.clone().into(),
                    self.user_id.clone().into(),
                    session_title(&self.user_message).into(),
                ],
            )
            .await?;
        store
            .execute(
                INSERT_MESSAGES,
                &[
                    self.session_id.clone().into(),
                    self.user_message.clone().into(),
                    self.reply.clone().into(),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Spawn a fire-and-forget persistence write.
///
/// If any step fails, a warning is logged and the error is dropped.
pub fn spawn_persist(store: SqlClient, exchange: Exchange) {
    tokio::spawn(async move {
        match exchange.persist(&store).await {
            Ok(()) => tracing::debug!(
                session_id = %exchange.session_id,
                "Persisted exchange"
            ),
            Err(e) => tracing::warn!(
                session_id = %exchange.session_id,
                error = %e,
                "Failed to persist exchange"
            ),
        }
    });
}

/// An exchange still waiting for its assistant reply.
#[derive(Debug, Clone)]
pub struct PendingExchange {
    store: SqlClient,
    session_id: String,
    user_id: String,
    user_message: String,
}

impl PendingExchange {
    pub fn new(
        store: SqlClient,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            user_id: user_id.into(),
            user_message: user_message.into(),
        }
    }

    /// Complete with `reply` and persist without waiting for the result.
    pub fn persist_in_background(self, reply: String) {
        let exchange = Exchange {
            session_id: self.session_id,
            user_id: self.user_id,
            user_message: self.user_message,
            reply,
        };
        spawn_persist(self.store, exchange);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store_for(server: &MockServer) -> SqlClient {
        SqlClient::new(
            reqwest::Client::new(),
            &ApiKey::from("postgres://u:p@db.example.com/neondb"),
            Some(&format!("{}/sql", server.uri())),
        )
        .unwrap()
    }

    fn exchange() -> Exchange {
        Exchange {
            session_id: "s-42".to_string(),
            user_id: "user_abc".to_string(),
            user_message: "hello there".to_string(),
            reply: "general kenobi".to_string(),
        }
    }

    #[test]
    fn test_short_title_unchanged() {
        assert_eq!(session_title("hello"), "hello");
        let exact: String = "a".repeat(60);
        assert_eq!(session_title(&exact), exact);
    }

    #[test]
    fn test_long_title_ellipsized() {
        let long = "b".repeat(61);
        let title = session_title(&long);
        assert_eq!(title.chars().count(), 61);
        assert!(title.ends_with('…'));
        assert!(title.starts_with(&"b".repeat(60)));
    }

    #[test]
    fn test_title_counts_chars_not_bytes() {
        let message = "é".repeat(70);
        let title = session_title(&message);
        assert_eq!(title, format!("{}…", "é".repeat(60)));
    }

    #[tokio::test]
    async fn test_persist_issues_statements_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(4)
            .mount(&server)
            .await;

        exchange().persist(&store_for(&server).await).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let bodies: Vec<serde_json::Value> = requests
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect();

        assert!(bodies[0]["query"]
            .as_str()
            .unwrap()
            .contains("CREATE TABLE IF NOT EXISTS sessions"));
        assert!(bodies[1]["query"]
            .as_str()
            .unwrap()
            .contains("ON DELETE CASCADE"));
        assert!(bodies[2]["query"]
            .as_str()
            .unwrap()
            .contains("ON CONFLICT (id) DO UPDATE SET updated_at = NOW()"));
        assert_eq!(
            bodies[2]["params"],
            serde_json::json!(["s-42", "user_abc", "hello there"])
        );
        assert_eq!(
            bodies[3]["params"],
            serde_json::json!(["s-42", "hello there", "general kenobi"])
        );
    }

    #[tokio::test]
    async fn test_persist_stops_at_first_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let err = exchange()
            .persist(&store_for(&server).await)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 500, .. }));
    }
}
