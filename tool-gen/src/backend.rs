//! Generative completion backends.
//!
//! The pipeline only depends on [`GenerativeBackend::complete`]; each provider
//! implements it once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::{BackendConfig, BackendProvider};
use crate::error::{Result, ToolError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One completion call: a fixed system role plus a user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Create a request with default sampling parameters.
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_output_tokens: 4096,
            temperature: 0.0,
        }
    }

    /// Set the output token budget.
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A text-completion capability.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Name of the provider, for logging.
    fn name(&self) -> &str;

    /// Complete `request`, returning the reply as free text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Build the backend selected by `config`.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn GenerativeBackend>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .map_err(|e| ToolError::Backend(e.to_string()))?;

    let backend: Arc<dyn GenerativeBackend> = match config.provider {
        BackendProvider::Anthropic => {
            let mut backend =
                AnthropicBackend::with_client(client, resolve_key(config, "ANTHROPIC_API_KEY"));
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(url) = &config.base_url {
                backend = backend.with_base_url(url);
            }
            Arc::new(backend)
        }
        BackendProvider::OpenAI => {
            let mut backend =
                OpenAIBackend::with_client(client, resolve_key(config, "OPENAI_API_KEY"));
            if let Some(model) = &config.model {
                backend = backend.with_model(model);
            }
            if let Some(url) = &config.base_url {
                backend = backend.with_base_url(url);
            }
            Arc::new(backend)
        }
    };
    Ok(backend)
}

fn resolve_key(config: &BackendConfig, env_var: &str) -> Option<String> {
    config
        .api_key
        .clone()
        .or_else(|| std::env::var(env_var).ok())
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ToolError::Backend(format!("HTTP {status}: {body}")))
}

/// Anthropic messages API backend.
pub struct AnthropicBackend {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    /// Create a backend with the given key.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key)
    }

    fn with_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            client,
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl GenerativeBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ToolError::Backend("ANTHROPIC_API_KEY is not set".to_string()))?;

        debug!(model = %self.model, "anthropic completion");

        let body = serde_json::json!({
            "model": self.model,
            "system": request.system,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Backend(e.to_string()))?;

        let parsed: AnthropicResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ToolError::Backend(format!("invalid response: {e}")))?;

        let text: String = parsed.content.into_iter().filter_map(|c| c.text).collect();
        if text.is_empty() {
            return Err(ToolError::Backend("response has no text content".to_string()));
        }
        Ok(text)
    }
}

/// OpenAI chat completions backend.
pub struct OpenAIBackend {
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAIBackend {
    /// Create a backend with the given key.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_key)
    }

    fn with_client(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            client,
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl GenerativeBackend for OpenAIBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ToolError::Backend("OPENAI_API_KEY is not set".to_string()))?;

        debug!(model = %self.model, "openai completion");

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::Backend(e.to_string()))?;

        let parsed: ChatResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ToolError::Backend(format!("invalid response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ToolError::Backend("response has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_anthropic_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "# START_SUMMARY\nx\n# END_SUMMARY"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            AnthropicBackend::new(Some("test-key".to_string())).with_base_url(server.uri());
        let text = backend
            .complete(&CompletionRequest::new("system", "prompt"))
            .await
            .unwrap();

        assert_eq!(text, "# START_SUMMARY\nx\n# END_SUMMARY");
    }

    #[tokio::test]
    async fn test_openai_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "hello"}}]
            })))
            .mount(&server)
            .await;

        let backend = OpenAIBackend::new(Some("sk-test".to_string())).with_base_url(server.uri());
        let text = backend
            .complete(&CompletionRequest::new("system", "prompt"))
            .await
            .unwrap();

        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_http_error_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let backend = OpenAIBackend::new(Some("sk-test".to_string())).with_base_url(server.uri());
        let err = backend
            .complete(&CompletionRequest::new("system", "prompt"))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Backend(msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let backend = AnthropicBackend::new(None);
        assert!(
            backend
                .complete(&CompletionRequest::new("s", "p"))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_build_backend_selects_provider() {
        let config = BackendConfig {
            provider: BackendProvider::OpenAI,
            api_key: Some("k".to_string()),
            ..BackendConfig::default()
        };
        assert_eq!(build_backend(&config).unwrap().name(), "openai");
        assert_eq!(
            build_backend(&BackendConfig::default()).unwrap().name(),
            "anthropic"
        );
    }
}
