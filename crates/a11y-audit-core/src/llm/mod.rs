mod openai;
mod settings;

use std::{env, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use openai::{classify_error, OpenAiClient};
pub use settings::{LlmSettings, ProviderKind};

/// Why one outbound call produced no usable answer text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallFailure {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("call timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    #[error("authentication rejected: {0}")]
    AuthFailure(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("call cancelled")]
    Cancelled,
}

impl CallFailure {
    /// Failures that are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallFailure::RateLimited(_) | CallFailure::Timeout(_) | CallFailure::Transient(_)
        )
    }
}

/// Result of exactly one network call: the raw answer text or a classified failure.
pub type CallOutcome = std::result::Result<String, CallFailure>;

/// One-shot completion call against a chat-completions style service.
///
/// Implementations perform a single request, bound it by `timeout`, abandon it
/// when `cancel` fires, and never retry on their own.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn send(
        &self,
        prompt: &str,
        api_key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CallOutcome;
}

/// Client that answers every prompt with an empty findings array.
#[derive(Debug, Default, Clone)]
pub struct NoopClient;

#[async_trait]
impl CompletionClient for NoopClient {
    async fn send(
        &self,
        _prompt: &str,
        _api_key: &str,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        if cancel.is_cancelled() {
            return Err(CallFailure::Cancelled);
        }
        Ok("[]".into())
    }
}

/// Build the client selected by `settings.provider`.
pub fn client_from_settings(settings: &LlmSettings) -> Result<Arc<dyn CompletionClient>> {
    match settings.provider_kind()? {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiClient::new(settings)?)),
        ProviderKind::Noop => Ok(Arc::new(NoopClient)),
    }
}

pub(crate) fn debug_log_payload(context: &str, payload: &str) {
    if debug_enabled() {
        tracing::warn!("{} raw model payload: {}", context, payload);
    }
}

fn debug_enabled() -> bool {
    matches!(env::var("A11Y_AUDIT_DEBUG"), Ok(val) if !val.is_empty() && val != "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_client_returns_empty_array() {
        let outcome = NoopClient
            .send("prompt", "", Duration::from_secs(1), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Ok("[]".to_string()));
    }

    #[tokio::test]
    async fn noop_client_honours_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = NoopClient
            .send("prompt", "", Duration::from_secs(1), &token)
            .await;
        assert_eq!(outcome, Err(CallFailure::Cancelled));
    }

    #[test]
    fn only_network_style_failures_are_retryable() {
        assert!(CallFailure::RateLimited("slow down".into()).is_retryable());
        assert!(CallFailure::Timeout(Duration::from_secs(45)).is_retryable());
        assert!(CallFailure::Transient("502".into()).is_retryable());
        assert!(!CallFailure::AuthFailure("bad key".into()).is_retryable());
        assert!(!CallFailure::Cancelled.is_retryable());
    }

    #[test]
    fn timeout_message_is_human_readable() {
        assert_eq!(
            CallFailure::Timeout(Duration::from_secs(45)).to_string(),
            "call timed out after 45s"
        );
    }
}
