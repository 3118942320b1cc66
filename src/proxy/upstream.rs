//! Upstream provider calls: text completion (buffered or streamed) and image
//! generation.

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ConversationWindow, GeminiGenerationConfig,
    GeminiRequest, GeminiResponse, ImageGenerationRequest, ImageGenerationResponse,
    ProviderErrorBody,
};
use crate::config::{ChatConfig, ImageConfig, ProviderKind};
use crate::error::{Error, Result};

/// Human-readable error text for a failed provider response.
///
/// Uses the provider's `error.message` when present, otherwise
/// `"<provider> error <status>"`.
pub(crate) fn error_message(provider: &str, status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ProviderErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .and_then(|detail| detail.message().map(str::to_string))
        .unwrap_or_else(|| format!("{} error {}", provider, status.as_u16()))
}

/// Pass 2xx responses through; turn anything else into [`Error::Upstream`].
async fn ensure_success(response: Response, provider: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.bytes().await.unwrap_or_default();
    let message = error_message(provider, status, &body);
    tracing::error!(
        status = %status,
        provider = %provider,
        error = %message,
        "Provider returned error"
    );
    Err(Error::Upstream(message))
}

fn send_failed(provider: &str, e: reqwest::Error) -> Error {
    tracing::error!(error = %e, provider = %provider, "Failed to reach provider");
    Error::Http(e)
}

/// Build the provider request for a conversation window.
fn chat_request(
    http: &Client,
    chat: &ChatConfig,
    window: &ConversationWindow,
    stream: bool,
) -> Result<RequestBuilder> {
    let api_key = chat
        .api_key
        .as_ref()
        .ok_or_else(|| Error::MissingCredential(format!("{} API key", chat.provider_name())))?;

    let request = match chat.kind {
        ProviderKind::OpenAi => {
            let body = ChatCompletionRequest {
                model: chat.model(),
                messages: window.to_openai_messages(),
                stream,
                temperature: chat.temperature,
                max_tokens: chat.max_tokens,
            };
            let mut request = http
                .post(format!("{}/chat/completions", chat.base_url()))
                .header(header::CONTENT_TYPE, "application/json")
                .bearer_auth(api_key.expose_secret())
                .json(&body);
            if let Some(referer) = &chat.referer {
                request = request.header("HTTP-Referer", referer);
            }
            if let Some(title) = &chat.title {
                request = request.header("X-Title", title);
            }
            request
        }
        ProviderKind::Gemini => {
            let (system_instruction, contents) = window.to_gemini_contents();
            let body = GeminiRequest {
                system_instruction,
                contents,
                generation_config: GeminiGenerationConfig {
                    temperature: chat.temperature,
                    max_output_tokens: chat.max_tokens,
                },
            };
            let url = if stream {
                format!(
                    "{}/models/{}:streamGenerateContent?alt=sse",
                    chat.base_url(),
                    chat.model()
                )
            } else {
                format!("{}/models/{}:generateContent", chat.base_url(), chat.model())
            };
            http.post(url)
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-goog-api-key", api_key.expose_secret())
                .json(&body)
        }
    };

    Ok(request)
}

/// Request one buffered completion and return its text.
pub async fn complete(http: &Client, chat: &ChatConfig, window: &ConversationWindow) -> Result<String> {
    let provider = chat.provider_name();
    let response = chat_request(http, chat, window, false)?
        .send()
        .await
        .map_err(|e| send_failed(provider, e))?;
    let response = ensure_success(response, provider).await?;

    let text = match chat.kind {
        ProviderKind::OpenAi => response
            .json::<ChatCompletionResponse>()
            .await
            .map(ChatCompletionResponse::into_text),
        ProviderKind::Gemini => response
            .json::<GeminiResponse>()
            .await
            .map(GeminiResponse::into_text),
    };

    match text {
        Ok(Some(text)) => Ok(text),
        Ok(None) => Err(Error::EmptyResponse(provider.to_string())),
        Err(e) => {
            tracing::warn!(error = %e, provider = %provider, "Undecodable completion body");
            Err(Error::EmptyResponse(provider.to_string()))
        }
    }
}

/// Open a streamed completion. The returned response has a 2xx status and an
/// SSE body that has not been read yet.
pub async fn open_stream(
    http: &Client,
    chat: &ChatConfig,
    window: &ConversationWindow,
) -> Result<Response> {
    let provider = chat.provider_name();
    let response = chat_request(http, chat, window, true)?
        .send()
        .await
        .map_err(|e| send_failed(provider, e))?;
    ensure_success(response, provider).await
}

/// Generate one image for `prompt`; returns the base64 payload.
pub async fn generate_image(http: &Client, image: &ImageConfig, prompt: &str) -> Result<String> {
    let api_key = image.api_key.as_ref().ok_or(Error::ImageUnavailable)?;
    let provider = image.name.as_str();

    let body = ImageGenerationRequest {
        model: &image.model,
        prompt,
        width: image.width,
        height: image.height,
        steps: image.steps,
        n: image.n,
        response_format: "b64_json",
    };

    let response = http
        .post(format!("{}/images/generations", image.url.trim_end_matches('/')))
        .header(header::CONTENT_TYPE, "application/json")
        .bearer_auth(api_key.expose_secret())
        .json(&body)
        .send()
        .await
        .map_err(|e| send_failed(provider, e))?;
    let response = ensure_success(response, provider).await?;

    match response.json::<ImageGenerationResponse>().await {
        Ok(parsed) => parsed
            .into_base64()
            .ok_or_else(|| Error::Upstream(format!("No image returned from {}.", provider))),
        Err(e) => {
            tracing::warn!(error = %e, provider = %provider, "Undecodable image body");
            Err(Error::Upstream(format!("No image returned from {}.", provider)))
        }
    }
}
