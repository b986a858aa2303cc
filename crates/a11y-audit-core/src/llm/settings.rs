use anyhow::{bail, Context, Result};
use std::{collections::HashMap, time::Duration};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Supported completion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    /// Offline client that reports no issues; used for dry runs and tests.
    Noop,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" | "" => Ok(Self::OpenAi),
            "noop" => Ok(Self::Noop),
            other => bail!("unsupported provider `{other}` (expected `openai` or `noop`)"),
        }
    }
}

/// Environment-driven configuration for the completion client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub provider: String,
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Total attempts per file, first call included.
    pub max_retries: u32,
}

impl LlmSettings {
    pub const PROVIDER_ENV: &'static str = "A11Y_AUDIT_PROVIDER";
    pub const API_KEY_ENV: &'static str = "A11Y_AUDIT_API_KEY";
    pub const ENDPOINT_ENV: &'static str = "A11Y_AUDIT_ENDPOINT";
    pub const MODEL_ENV: &'static str = "A11Y_AUDIT_MODEL";
    pub const TIMEOUT_ENV: &'static str = "A11Y_AUDIT_TIMEOUT_SECS";
    pub const RETRIES_ENV: &'static str = "A11Y_AUDIT_MAX_RETRIES";

    /// Load settings from environment variables.
    ///
    /// * `A11Y_AUDIT_PROVIDER`: `openai` (default) or `noop`.
    /// * `A11Y_AUDIT_API_KEY`: bearer token (required unless `noop`).
    /// * `A11Y_AUDIT_ENDPOINT`: optional base URL of an OpenAI-compatible service.
    /// * `A11Y_AUDIT_MODEL`, `A11Y_AUDIT_TIMEOUT_SECS`, `A11Y_AUDIT_MAX_RETRIES`.
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    /// Build settings from an arbitrary key/value map using the environment variable names.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let non_empty = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let provider = non_empty(Self::PROVIDER_ENV).unwrap_or_else(|| "openai".to_string());
        let api_key = match ProviderKind::parse(&provider)? {
            ProviderKind::Noop => non_empty(Self::API_KEY_ENV).unwrap_or_default(),
            ProviderKind::OpenAi => non_empty(Self::API_KEY_ENV).with_context(|| {
                format!("environment variable {} must be set", Self::API_KEY_ENV)
            })?,
        };
        let endpoint = non_empty(Self::ENDPOINT_ENV);
        let model = non_empty(Self::MODEL_ENV).unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let timeout_secs = match non_empty(Self::TIMEOUT_ENV) {
            Some(raw) => raw.parse::<u64>().with_context(|| {
                format!("{} must be a whole number of seconds", Self::TIMEOUT_ENV)
            })?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let max_retries = non_empty(Self::RETRIES_ENV)
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_MAX_RETRIES);

        Ok(Self {
            provider,
            api_key,
            endpoint,
            model,
            timeout_secs,
            max_retries,
        })
    }

    pub fn provider_kind(&self) -> Result<ProviderKind> {
        ProviderKind::parse(&self.provider)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
