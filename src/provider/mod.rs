//! LLM provider adapters
//!
//! Every backend sits behind [`LlmProvider`]; the concrete adapter is picked
//! from [`ProviderKind`] when a pipeline is submitted. Adapters never retry:
//! retry policy belongs to the orchestrator.

pub mod echo;
pub mod http;

use crate::core::config::{ConfigError, ProviderConfig};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use echo::EchoProvider;
pub use http::HttpProvider;

/// Error types for provider calls
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected (HTTP {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

/// Per-call generation options
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// System instructions sent separately where the API supports it
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Trait for LLM backends
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Send a prompt and return the completion text
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError>;
}

/// Build the adapter for a provider configuration
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let kind = config.validate()?;
    let api_key = config.resolve_api_key()?;
    Ok(Arc::new(HttpProvider::new(kind, config, api_key)))
}
