//! Inbound request types, the conversation window, and provider wire types.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub token: Option<String>,
    /// Overrides `chat.stream` for this request.
    pub stream: Option<bool>,
}

/// One prior turn as the browser client stores it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl HistoryEntry {
    pub fn new(role: HistoryRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
        }
    }

    /// Text of all parts, concatenated.
    pub fn text(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }
}

/// Roles as the client names them. Anything unrecognised counts as the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    #[serde(alias = "assistant")]
    Model,
    #[serde(other)]
    User,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

/// A validated chat turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub session_id: Option<String>,
    pub message: String,
    pub history: Vec<HistoryEntry>,
    pub token: Option<String>,
}

impl TryFrom<ChatRequest> for ChatTurn {
    type Error = Error;

    fn try_from(request: ChatRequest) -> Result<Self, Self::Error> {
        let message = match request.message {
            Some(message) if !message.trim().is_empty() => message,
            _ => return Err(Error::BadRequest("Message is required.".to_string())),
        };

        Ok(Self {
            session_id: request.session_id.filter(|s| !s.is_empty()),
            message,
            history: request.history,
            token: request.token.filter(|t| !t.is_empty()),
        })
    }
}

/// Speaker of a turn inside the conversation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// The bounded slice of history sent upstream.
///
/// `turns` always ends with the new user message; the system instruction is
/// held separately and always goes first on the wire.
#[derive(Debug, Clone)]
pub struct ConversationWindow {
    pub system: String,
    pub turns: Vec<WindowTurn>,
}

impl ConversationWindow {
    /// Keep the last `limit` history entries, oldest first, then append `message`.
    pub fn build(system: &str, history: &[HistoryEntry], limit: usize, message: &str) -> Self {
        let start = history.len().saturating_sub(limit);
        let mut turns: Vec<WindowTurn> = history[start..]
            .iter()
            .map(|entry| WindowTurn {
                speaker: match entry.role {
                    HistoryRole::Model => Speaker::Assistant,
                    HistoryRole::User => Speaker::User,
                },
                text: entry.text(),
            })
            .collect();
        turns.push(WindowTurn {
            speaker: Speaker::User,
            text: message.to_string(),
        });

        Self {
            system: system.to_string(),
            turns,
        }
    }

    /// OpenAI-compatible message list: system, history, new message.
    pub fn to_openai_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(Message {
            role: "system".to_string(),
            content: self.system.clone(),
        });
        messages.extend(self.turns.iter().map(|turn| Message {
            role: match turn.speaker {
                Speaker::User => "user",
                Speaker::Assistant => "assistant",
            }
            .to_string(),
            content: turn.text.clone(),
        }));
        messages
    }

    /// Gemini `contents` plus the separate `systemInstruction`.
    pub fn to_gemini_contents(&self) -> (GeminiContent, Vec<GeminiContent>) {
        let system = GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(self.system.clone()),
            }],
        };
        let contents = self
            .turns
            .iter()
            .map(|turn| GeminiContent {
                role: Some(
                    match turn.speaker {
                        Speaker::User => "user",
                        Speaker::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![GeminiPart {
                    text: Some(turn.text.clone()),
                }],
            })
            .collect();
        (system, contents)
    }
}

/// Events written to the caller on a streaming reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Chunk(String),
    Done,
    Error(String),
}

impl RelayEvent {
    /// JSON payload of the `data:` line.
    pub fn payload(&self) -> String {
        match self {
            RelayEvent::Chunk(text) => serde_json::json!({ "chunk": text }),
            RelayEvent::Done => serde_json::json!({ "done": true }),
            RelayEvent::Error(message) => serde_json::json!({ "error": message }),
        }
        .to_string()
    }
}

// ── OpenAI-compatible wire types ──

/// Chat completion request (OpenAI-compatible).
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<Message>,
    pub stream: bool,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// Chat completion response; every level may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// `choices[0].message.content`, if non-empty.
    pub fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()?
            .message?
            .content
            .filter(|c| !c.is_empty())
    }
}

/// Streaming chunk (OpenAI-compatible).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    pub error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: Option<Delta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    pub fn delta_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()?
            .delta?
            .content
            .filter(|c| !c.is_empty())
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub system_instruction: GeminiContent,
    pub contents: Vec<GeminiContent>,
    pub generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Used both for `generateContent` bodies and for each streamed event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    pub error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiCandidate {
    pub content: Option<GeminiContent>,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate, if non-empty.
    pub fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        Some(text).filter(|t| !t.is_empty())
    }
}

// ── Image generation wire types ──

#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub n: u32,
    pub response_format: &'static str,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageGenerationResponse {
    #[serde(default)]
    pub data: Vec<ImageDatum>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageDatum {
    pub b64_json: Option<String>,
}

impl ImageGenerationResponse {
    pub fn into_base64(self) -> Option<String> {
        self.data
            .into_iter()
            .next()?
            .b64_json
            .filter(|b| !b.is_empty())
    }
}

/// Body returned for the image route.
#[derive(Debug, Clone, Serialize)]
pub struct ImageReply {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub image: String,
    pub prompt: String,
}

// ── Shared error payload ──

/// `{"error": {"message": "..."}}`, as OpenRouter, Gemini and Together send it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderErrorBody {
    pub error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderErrorDetail {
    pub message: Option<String>,
}

impl ProviderErrorDetail {
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize) -> Vec<HistoryEntry> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 {
                    HistoryRole::User
                } else {
                    HistoryRole::Model
                };
                HistoryEntry::new(role, format!("turn {}", i))
            })
            .collect()
    }

    #[test]
    fn test_blank_message_rejected() {
        for message in [None, Some(""), Some("   \n\t ")] {
            let request = ChatRequest {
                message: message.map(str::to_string),
                ..Default::default()
            };
            let err = ChatTurn::try_from(request).unwrap_err();
            assert!(matches!(err, Error::BadRequest(_)));
        }
    }

    #[test]
    fn test_message_kept_untrimmed() {
        let request = ChatRequest {
            message: Some("  hi  ".to_string()),
            session_id: Some(String::new()),
            ..Default::default()
        };
        let turn = ChatTurn::try_from(request).unwrap();
        assert_eq!(turn.message, "  hi  ");
        assert!(turn.session_id.is_none(), "empty session id counts as absent");
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{
            "sessionId": "s-1",
            "message": "hello",
            "history": [
                {"role": "user", "parts": [{"text": "a"}]},
                {"role": "model", "parts": [{"text": "b"}, {"text": "c"}]},
                {"role": "tool", "parts": []}
            ],
            "token": "tok"
        }"#;
        let request: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.session_id.as_deref(), Some("s-1"));
        assert_eq!(request.history[0].role, HistoryRole::User);
        assert_eq!(request.history[1].role, HistoryRole::Model);
        assert_eq!(request.history[1].text(), "bc");
        assert_eq!(request.history[2].role, HistoryRole::User);
        assert!(request.stream.is_none());
    }

    #[test]
    fn test_window_keeps_most_recent_in_order() {
        let window = ConversationWindow::build("sys", &history(30), 20, "new");

        assert_eq!(window.turns.len(), 21);
        assert_eq!(window.turns[0].text, "turn 10");
        assert_eq!(window.turns[19].text, "turn 29");
        assert_eq!(
            window.turns[20],
            WindowTurn {
                speaker: Speaker::User,
                text: "new".to_string()
            }
        );
    }

    #[test]
    fn test_window_shorter_history_kept_whole() {
        let window = ConversationWindow::build("sys", &history(3), 20, "new");
        assert_eq!(window.turns.len(), 4);
        assert_eq!(window.turns[0].text, "turn 0");
    }

    #[test]
    fn test_openai_messages_system_first_message_last() {
        let window = ConversationWindow::build("be nice", &history(2), 20, "question");
        let messages = window.to_openai_messages();

        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[0].content, "be nice");
        assert_eq!(messages[3].content, "question");
    }

    #[test]
    fn test_gemini_contents_use_model_role() {
        let window = ConversationWindow::build("be nice", &history(2), 20, "question");
        let (system, contents) = window.to_gemini_contents();

        assert!(system.role.is_none());
        assert_eq!(system.parts[0].text.as_deref(), Some("be nice"));
        let roles: Vec<&str> = contents
            .iter()
            .map(|c| c.role.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn test_relay_event_payloads() {
        assert_eq!(
            RelayEvent::Chunk("a\"b".to_string()).payload(),
            r#"{"chunk":"a\"b"}"#
        );
        assert_eq!(RelayEvent::Done.payload(), r#"{"done":true}"#);
        assert_eq!(
            RelayEvent::Error("boom".to_string()).payload(),
            r#"{"error":"boom"}"#
        );
    }

    #[test]
    fn test_completion_text_extraction() {
        let ok: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hi"}}]
        }))
        .unwrap();
        assert_eq!(ok.into_text().as_deref(), Some("hi"));

        for body in [
            serde_json::json!({}),
            serde_json::json!({"choices": []}),
            serde_json::json!({"choices": [{"message": {"content": null}}]}),
            serde_json::json!({"choices": [{"message": {"content": ""}}]}),
        ] {
            let parsed: ChatCompletionResponse = serde_json::from_value(body).unwrap();
            assert!(parsed.into_text().is_none());
        }
    }

    #[test]
    fn test_gemini_text_extraction() {
        let parsed: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]}}]
        }))
        .unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("Hello"));

        let blocked: GeminiResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(blocked.into_text().is_none());
    }

    #[test]
    fn test_image_extraction() {
        let parsed: ImageGenerationResponse = serde_json::from_value(serde_json::json!({
            "data": [{"b64_json": "aGVsbG8="}]
        }))
        .unwrap();
        assert_eq!(parsed.into_base64().as_deref(), Some("aGVsbG8="));

        let empty: ImageGenerationResponse =
            serde_json::from_value(serde_json::json!({"data": [{"url": "https://x"}]})).unwrap();
        assert!(empty.into_base64().is_none());
    }

    #[test]
    fn test_image_reply_shape() {
        let reply = ImageReply {
            kind: "image",
            image: "aGVsbG8=".to_string(),
            prompt: "draw a cat".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"type": "image", "image": "aGVsbG8=", "prompt": "draw a cat"})
        );
    }
}
