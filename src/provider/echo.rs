//! Offline provider that answers without network access

use super::{CompletionOptions, LlmProvider, ProviderError};
use async_trait::async_trait;

/// Returns a short deterministic completion derived from the prompt.
/// Used by `vedops run --offline` to exercise a pipeline end to end.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    model: String,
}

impl EchoProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let headline = prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();

        Ok(format!(
            "[offline:{}] {} ({} prompt lines)\nDECISION: APPROVE",
            self.model,
            headline,
            prompt.lines().count()
        ))
    }
}
