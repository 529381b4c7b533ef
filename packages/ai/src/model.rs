// ABOUTME: Model client seam: the chat service asks for text and never runs inference itself
// ABOUTME: Anthropic Messages API client plus a scripted client for transcripts and tests

use crate::error::{ChatError, ChatResult};
use async_trait::async_trait;
use conduit_config::constants::{ANTHROPIC_API_KEY, ANTHROPIC_MODEL};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// What the model is asked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPrompt {
    pub project_id: String,
    pub message: String,
    pub system: Option<String>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Free-form reply text for `prompt`
    async fn complete(&self, prompt: &ModelPrompt) -> ChatResult<String>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

impl AnthropicClient {
    fn create_client() -> ChatResult<Client> {
        Ok(Client::builder()
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(10))
            .build()?)
    }

    /// Key from `ANTHROPIC_API_KEY`; model overridable with `ANTHROPIC_MODEL`.
    pub fn from_env() -> ChatResult<Self> {
        let api_key = std::env::var(ANTHROPIC_API_KEY).ok();
        if api_key.is_none() {
            warn!("{} not set; model requests will fail", ANTHROPIC_API_KEY);
        }
        let model = std::env::var(ANTHROPIC_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        if model != DEFAULT_MODEL {
            info!("Using custom Anthropic model: {}", model);
        }

        Ok(Self {
            client: Self::create_client()?,
            api_key,
            model,
            endpoint: ANTHROPIC_API_URL.to_string(),
        })
    }

    pub fn with_api_key(api_key: impl Into<String>, model: impl Into<String>) -> ChatResult<Self> {
        Ok(Self {
            client: Self::create_client()?,
            api_key: Some(api_key.into()),
            model: model.into(),
            endpoint: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Point at a different messages endpoint (proxies, tests)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(&self, prompt: &ModelPrompt) -> ChatResult<String> {
        let api_key = self.api_key.as_deref().ok_or(ChatError::NoApiKey)?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            messages: vec![Message {
                role: "user",
                content: &prompt.message,
            }],
            system: prompt.system.as_deref(),
        };

        info!(
            "Requesting model reply for project {}: model={}",
            prompt.project_id, self.model
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Model request timed out");
                    ChatError::ApiError("Request timed out".to_string())
                } else if e.is_connect() {
                    error!("Failed to connect to model API: {}", e);
                    ChatError::ApiError(format!("Connection failed: {}", e))
                } else {
                    error!("Model request failed: {}", e);
                    ChatError::RequestFailed(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Model API error: {} - {}", status, error_text);
            return Err(ChatError::ApiError(format!(
                "API returned {}: {}",
                status, error_text
            )));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ChatError::ParseError(e.to_string()))?;

        let text: String = body
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(ChatError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Replays canned replies in order, one per request.
#[derive(Default)]
pub struct ScriptedModelClient {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<ModelPrompt>>,
}

impl ScriptedModelClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply.into());
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<ModelPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn complete(&self, prompt: &ModelPrompt) -> ChatResult<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.clone());
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .ok_or(ChatError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt(message: &str) -> ModelPrompt {
        ModelPrompt {
            project_id: "demo".into(),
            message: message.into(),
            system: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let client = ScriptedModelClient::new(["one", "two"]);

        assert_eq!(client.complete(&prompt("a")).await.unwrap(), "one");
        assert_eq!(client.complete(&prompt("b")).await.unwrap(), "two");
        assert!(matches!(
            client.complete(&prompt("c")).await,
            Err(ChatError::EmptyResponse)
        ));
        assert_eq!(client.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_anthropic_client_joins_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "content": [
                    { "type": "text", "text": "Create `a.txt`." },
                    { "type": "text", "text": "Done." }
                ]
            })))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("test-key", "test-model")
            .unwrap()
            .with_endpoint(format!("{}/v1/messages", server.uri()));

        let text = client.complete(&prompt("hi")).await.unwrap();
        assert_eq!(text, "Create `a.txt`.\nDone.");
    }

    #[tokio::test]
    async fn test_anthropic_client_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = AnthropicClient::with_api_key("k", "m")
            .unwrap()
            .with_endpoint(server.uri());

        let err = client.complete(&prompt("hi")).await.unwrap_err();
        assert_eq!(err.kind(), "model_unavailable");
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_from_env_without_key_fails_on_request() {
        std::env::remove_var(ANTHROPIC_API_KEY);
        std::env::remove_var(ANTHROPIC_MODEL);

        let client = AnthropicClient::from_env().unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert!(matches!(
            client.complete(&prompt("hi")).await,
            Err(ChatError::NoApiKey)
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_model_override() {
        std::env::set_var(ANTHROPIC_API_KEY, "env-key");
        std::env::set_var(ANTHROPIC_MODEL, "custom-model");

        let client = AnthropicClient::from_env().unwrap();
        assert_eq!(client.model(), "custom-model");
        assert_eq!(client.api_key.as_deref(), Some("env-key"));

        std::env::remove_var(ANTHROPIC_API_KEY);
        std::env::remove_var(ANTHROPIC_MODEL);
    }
}
