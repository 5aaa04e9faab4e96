pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use tracing::info;

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    Timeout(String),
    AuthenticationError(String),
    RateLimited(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::Timeout(msg) => write!(f, "LLM request timed out: {}", msg),
            LlmError::AuthenticationError(msg) => write!(f, "LLM authentication failed: {}", msg),
            LlmError::RateLimited(msg) => write!(f, "LLM rate limit exceeded: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

impl LlmError {
    /// Maps a transport failure from reqwest onto the matching variant.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout(e.to_string())
        } else {
            LlmError::ConnectionError(e.to_string())
        }
    }

    /// Maps a non-success HTTP status onto the matching variant.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("status code {}", status)
        } else {
            format!("status code {} - {}", status, truncate(body, 300))
        };

        match status.as_u16() {
            401 | 403 => LlmError::AuthenticationError(detail),
            429 => LlmError::RateLimited(detail),
            _ => LlmError::ResponseError(detail),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A single "complete this prompt" operation against a model provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct LlmManager {
    model: Box<dyn LanguageModel + Send + Sync>,
}

impl LlmManager {
    /// `api_key` has already been resolved from the environment for backends that need one.
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, LlmError> {
        let model: Box<dyn LanguageModel + Send + Sync> = match config.backend.as_str() {
            "remote" | "openai" => Box::new(providers::remote::RemoteLlmProvider::new(
                config,
                api_key.ok_or_else(|| {
                    LlmError::ConfigError("API key is required for remote LLM provider".to_string())
                })?,
            )?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        info!("Using LLM backend '{}' with model '{}'", config.backend, config.model);
        Ok(Self { model })
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.model.complete(prompt).await
    }
}
