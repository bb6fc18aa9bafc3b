//! Model execution boundary and LLM provider abstractions.
//!
//! The agent runtime only knows [`ModelExecutor`]: give it a rendered prompt
//! and an Output Model, get JSON back. [`StructuredExecutor`] implements that
//! on top of any chat-completion [`LlmProvider`], and the HTTP providers sit
//! behind the `anthropic` and `openai` features.
//!
//! ## Security
//!
//! Providers hold credentials through [`secrets::ApiCredential`], which never
//! prints its value.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use textagent_core::{ModelDefinition, Settings};

mod factory;
pub mod secrets;
mod structured;

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "openai")]
mod openai;

pub use factory::{split_model_id, ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};
pub use structured::{extract_json, StructuredExecutor};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};
#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Default completion budget.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from providers and executors.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },
}

/// Configuration for one completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    /// Provider-side model name (no `provider:` prefix)
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature; provider default when unset
    pub temperature: Option<f32>,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl CompletionConfig {
    /// Read `max_tokens`, `temperature` and `timeout` from agent settings.
    ///
    /// `timeout` is either a number of seconds or a humantime string like `"30s"`.
    pub fn from_settings(model: impl Into<String>, settings: &Settings) -> Result<Self, ProviderError> {
        let mut config = Self {
            model: model.into(),
            ..Self::default()
        };

        if let Some(value) = settings.get("max_tokens") {
            config.max_tokens = value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("max_tokens", value, "expected a positive integer"))?;
        }

        if let Some(value) = settings.get("temperature") {
            let temperature = value
                .as_f64()
                .ok_or_else(|| invalid("temperature", value, "expected a number"))?;
            config.temperature = Some(temperature as f32);
        }

        if let Some(value) = settings.get("timeout") {
            config.timeout = match value {
                Value::Number(n) => n
                    .as_f64()
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .map(Duration::from_secs_f64)
                    .ok_or_else(|| invalid("timeout", value, "expected a positive number of seconds"))?,
                Value::String(text) => humantime::parse_duration(text)
                    .map_err(|e| invalid("timeout", value, &e.to_string()))?,
                _ => return Err(invalid("timeout", value, "expected seconds or a duration like \"30s\"")),
            };
        }

        Ok(config)
    }
}

fn invalid(key: &str, value: &Value, message: &str) -> ProviderError {
    ProviderError::InvalidSetting {
        key: key.to_string(),
        message: format!("{} (got {})", message, value),
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,
}

/// Token usage from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Accumulate usage across attempts.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// One request to the model-execution service.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    /// Model identifier as written in the agent file, e.g. `openai:gpt-4o`
    pub model: &'a str,

    /// Rendered user prompt
    pub prompt: &'a str,

    /// Rendered system instructions
    pub instructions: Option<&'a str>,

    /// Shape the reply must take
    pub output_model: &'a ModelDefinition,

    /// Opaque agent settings
    pub settings: &'a Settings,

    /// Why the previous attempt was rejected
    pub feedback: Option<&'a str>,

    /// 1-based attempt number
    pub attempt: u32,
}

/// Structured reply from the model-execution service.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    /// Reply data, validated by the caller against the Output Model
    pub data: Value,

    /// Token usage for this attempt
    pub usage: TokenUsage,
}

impl DispatchResponse {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            usage: TokenUsage::default(),
        }
    }
}

/// The model-execution service: rendered prompt in, structured data out.
///
/// Implementations do not validate the reply; the agent runtime does that
/// and decides whether to retry with feedback.
#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn dispatch(&self, request: &DispatchRequest<'_>) -> Result<DispatchResponse, ProviderError>;

    /// Executor name for logs.
    fn name(&self) -> &str {
        "executor"
    }
}
