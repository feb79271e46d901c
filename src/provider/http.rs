//! HTTP adapters for hosted and self-hosted LLM APIs

use super::{CompletionOptions, LlmProvider, ProviderError};
use crate::core::config::{ProviderConfig, ProviderKind};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// One adapter for every [`ProviderKind`], dispatching on the kind
pub struct HttpProvider {
    kind: ProviderKind,
    model: String,
    api_key: Option<String>,
    base_url: Option<String>,
    endpoint: Option<String>,
    deployment_name: Option<String>,
    api_version: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(kind: ProviderKind, config: &ProviderConfig, api_key: Option<String>) -> Self {
        Self {
            kind,
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.as_ref().map(|u| u.trim_end_matches('/').to_string()),
            endpoint: config.endpoint.as_ref().map(|u| u.trim_end_matches('/').to_string()),
            deployment_name: config.deployment_name.clone(),
            api_version: config.api_version.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Request URL for the configured backend
    pub fn url(&self) -> String {
        let base = |default: &str| self.base_url.clone().unwrap_or_else(|| default.to_string());

        match self.kind {
            ProviderKind::OpenAi => format!("{}/chat/completions", base(OPENAI_BASE_URL)),
            ProviderKind::Custom => format!("{}/chat/completions", base(OPENAI_BASE_URL)),
            ProviderKind::AzureOpenAi => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint.as_deref().unwrap_or_default(),
                self.deployment_name.as_deref().unwrap_or_default(),
                self.api_version.as_deref().unwrap_or_default(),
            ),
            ProviderKind::Anthropic => format!("{}/messages", base(ANTHROPIC_BASE_URL)),
            ProviderKind::Google => {
                format!("{}/models/{}:generateContent", base(GOOGLE_BASE_URL), self.model)
            }
            ProviderKind::Ollama => format!("{}/api/chat", base(OLLAMA_BASE_URL)),
        }
    }

    /// Request body in the backend's wire format
    pub fn request_body(&self, prompt: &str, options: &CompletionOptions) -> serde_json::Value {
        let temperature = options.temperature.or(self.temperature);
        let max_tokens = options.max_tokens.or(self.max_tokens);

        match self.kind {
            ProviderKind::OpenAi | ProviderKind::Custom | ProviderKind::AzureOpenAi => {
                let mut messages = Vec::new();
                if let Some(system) = &options.system {
                    messages.push(json!({ "role": "system", "content": system }));
                }
                messages.push(json!({ "role": "user", "content": prompt }));

                let mut body = json!({ "model": self.model, "messages": messages });
                if let Some(t) = temperature {
                    body["temperature"] = json!(t);
                }
                if let Some(m) = max_tokens {
                    body["max_tokens"] = json!(m);
                }
                body
            }
            ProviderKind::Anthropic => {
                let mut body = json!({
                    "model": self.model,
                    "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                    "messages": [{ "role": "user", "content": prompt }],
                });
                if let Some(system) = &options.system {
                    body["system"] = json!(system);
                }
                if let Some(t) = temperature {
                    body["temperature"] = json!(t);
                }
                body
            }
            ProviderKind::Google => {
                let mut body = json!({
                    "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                });
                if let Some(system) = &options.system {
                    body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
                }
                let mut generation = serde_json::Map::new();
                if let Some(t) = temperature {
                    generation.insert("temperature".to_string(), json!(t));
                }
                if let Some(m) = max_tokens {
                    generation.insert("maxOutputTokens".to_string(), json!(m));
                }
                if !generation.is_empty() {
                    body["generationConfig"] = serde_json::Value::Object(generation);
                }
                body
            }
            ProviderKind::Ollama => {
                let mut messages = Vec::new();
                if let Some(system) = &options.system {
                    messages.push(json!({ "role": "system", "content": system }));
                }
                messages.push(json!({ "role": "user", "content": prompt }));

                let mut body = json!({ "model": self.model, "messages": messages, "stream": false });
                let mut model_options = serde_json::Map::new();
                if let Some(t) = temperature {
                    model_options.insert("temperature".to_string(), json!(t));
                }
                if let Some(m) = max_tokens {
                    model_options.insert("num_predict".to_string(), json!(m));
                }
                if !model_options.is_empty() {
                    body["options"] = serde_json::Value::Object(model_options);
                }
                body
            }
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(key) = &self.api_key else {
            return request;
        };

        match self.kind {
            ProviderKind::OpenAi | ProviderKind::Custom | ProviderKind::Ollama => {
                request.header("Authorization", format!("Bearer {}", key))
            }
            ProviderKind::AzureOpenAi => request.header("api-key", key),
            ProviderKind::Anthropic => request
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ProviderKind::Google => request.header("x-goog-api-key", key),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ProviderError> {
        let url = self.url();
        debug!("{} request to {} ({} prompt chars)", self.kind, url, prompt.len());

        let request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt, options));

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), body));
        }

        parse_completion(self.kind, &body)
    }
}

/// Map a non-success HTTP status to a provider error
pub fn classify_status(status: u16, body: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth { status, body },
        429 => ProviderError::RateLimited(body),
        _ => ProviderError::Api { status, body },
    }
}

// OpenAI-compatible API types
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

// Google API types
#[derive(Debug, Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    content: GoogleContent,
}

#[derive(Debug, Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

// Ollama API types
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}

/// Extract the completion text from a response body
pub fn parse_completion(kind: ProviderKind, body: &str) -> Result<String, ProviderError> {
    let malformed = |e: serde_json::Error| ProviderError::InvalidResponse(e.to_string());

    let text = match kind {
        ProviderKind::OpenAi | ProviderKind::Custom | ProviderKind::AzureOpenAi => {
            let response: ChatResponse = serde_json::from_str(body).map_err(malformed)?;
            response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
        }
        ProviderKind::Anthropic => {
            let response: AnthropicResponse = serde_json::from_str(body).map_err(malformed)?;
            let text: String = response.content.into_iter().filter_map(|c| c.text).collect();
            Some(text).filter(|t| !t.is_empty())
        }
        ProviderKind::Google => {
            let response: GoogleResponse = serde_json::from_str(body).map_err(malformed)?;
            response.candidates.into_iter().next().map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
        }
        ProviderKind::Ollama => {
            let response: OllamaResponse = serde_json::from_str(body).map_err(malformed)?;
            response.message.content
        }
    };

    text.ok_or_else(|| ProviderError::InvalidResponse(format!("no completion text from {}", kind)))
}
