//! Minimal Anthropic Messages API client.

use std::time::Duration;

use leadforge_shared::{AiConfig, ChannelError, secret_from_env};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for the Claude client.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    /// API base (for testing or proxy); `/v1/messages` is appended.
    pub endpoint: String,
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        let defaults = AiConfig::default();
        Self {
            api_key: api_key.into(),
            model: defaults.model,
            max_tokens: defaults.max_tokens,
            timeout: Duration::from_secs(defaults.timeout_secs),
            endpoint: defaults.endpoint,
        }
    }

    /// Build from app config. Returns `None` when the key env var is unset,
    /// which callers treat as "use the deterministic fallback".
    pub fn from_app_config(config: &AiConfig) -> Option<Self> {
        let api_key = secret_from_env(&config.api_key_env)?;
        Some(Self {
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [RequestMessage<'a>; 1],
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Claude client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    http: Client,
    config: ClaudeConfig,
}

impl ClaudeClient {
    pub fn new(config: ClaudeConfig) -> Result<Self, ChannelError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send a single user prompt and return the first text block.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, ChannelError> {
        let url = format!(
            "{}/v1/messages",
            self.config.endpoint.trim_end_matches('/')
        );
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: max_tokens.min(self.config.max_tokens),
            messages: [RequestMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;

        parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| ChannelError::InvalidResponse("no text block in response".into()))
    }

    /// Send a prompt that asks for a JSON object and decode it.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<T, ChannelError> {
        let text = self.complete(prompt, max_tokens).await?;
        debug!(model = %self.config.model, len = text.len(), "model response received");
        let value = extract_json_object(&text)
            .ok_or_else(|| ChannelError::InvalidResponse("no JSON object in response".into()))?;
        serde_json::from_value(value).map_err(|e| ChannelError::InvalidResponse(e.to_string()))
    }
}

/// Pull the outermost `{...}` out of model text (which may be fenced or
/// wrapped in prose) and parse it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn extracts_fenced_json() {
        let text = "Here you go:\n```json\n{\"score\": 72, \"summary\": \"ok\"}\n```";
        let value = extract_json_object(text).expect("json");
        assert_eq!(value["score"], 72);
    }

    #[test]
    fn rejects_non_object_text() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
        assert!(extract_json_object("{not valid}").is_none());
    }

    #[tokio::test]
    async fn complete_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "hello"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            ClaudeClient::new(ClaudeConfig::new("test-key").with_endpoint(server.uri())).unwrap();
        let text = client.complete("hi", 64).await.expect("completion");
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client =
            ClaudeClient::new(ClaudeConfig::new("k").with_endpoint(server.uri())).unwrap();
        let err = client.complete("hi", 64).await.unwrap_err();
        assert!(matches!(err, ChannelError::Provider { status: 529, .. }));
    }

    #[test]
    fn missing_key_env_disables_client() {
        let config = AiConfig {
            api_key_env: "LF_TEST_NONEXISTENT_AI_KEY_12345".into(),
            ..AiConfig::default()
        };
        assert!(ClaudeConfig::from_app_config(&config).is_none());
    }
}
