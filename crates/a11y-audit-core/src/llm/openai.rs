use super::{debug_log_payload, CallFailure, CallOutcome, CompletionClient, LlmSettings};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MAX_TOKENS: u32 = 2500;
const TEMPERATURE: f32 = 0.0;
const AUTH_MARKERS: [&str; 3] = ["invalid api key", "authentication", "incorrect api key"];
const RATE_LIMIT_MARKER: &str = "rate limit";

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent(concat!("a11y-audit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            http,
            url,
            model: settings.model.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn exchange(&self, prompt: &str, api_key: &str) -> CallOutcome {
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| CallFailure::Transient(format!("request failed: {err}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| CallFailure::Transient(format!("failed to read response body: {err}")))?;
        debug_log_payload("openai", &body);

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        let chat: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|err| CallFailure::Transient(format!("unparsable completion body: {err}")))?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CallFailure::Transient("completion returned empty content".into()))
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn send(
        &self,
        prompt: &str,
        api_key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        if cancel.is_cancelled() {
            return Err(CallFailure::Cancelled);
        }
        debug!(
            url = %self.url,
            model = %self.model,
            prompt_chars = prompt.len(),
            "sending completion request"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallFailure::Cancelled),
            result = tokio::time::timeout(timeout, self.exchange(prompt, api_key)) => {
                result.unwrap_or(Err(CallFailure::Timeout(timeout)))
            }
        }
    }
}

/// Classify a non-2xx response from its `error.message` text, with the status code as a second signal.
pub fn classify_error(status: StatusCode, body: &str) -> CallFailure {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_default();
    let lowered = message.to_lowercase();
    let detail = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {message}")
    };

    if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return CallFailure::AuthFailure(message);
    }
    if lowered.contains(RATE_LIMIT_MARKER) {
        return CallFailure::RateLimited(message);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CallFailure::AuthFailure(detail),
        StatusCode::TOO_MANY_REQUESTS => CallFailure::RateLimited(detail),
        _ => CallFailure::Transient(detail),
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}
