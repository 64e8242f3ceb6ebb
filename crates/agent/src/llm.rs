use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use procura_core::config::AssistantConfig;

use crate::error::AssistantError;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;
const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single forced tool call: the model must answer by filling `tool`'s input.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub system: String,
    pub prompt: String,
    pub tool: ToolSpec,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns the tool input the model produced, or `None` when it answered without
    /// calling the tool.
    async fn invoke_tool(&self, invocation: ToolInvocation)
        -> Result<Option<Value>, AssistantError>;
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Messages API client over `reqwest`.
pub struct AnthropicClient {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl AnthropicClient {
    pub fn from_config(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            AssistantError::Configuration("assistant.api_key is required".to_owned())
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| AssistantError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(16);
        self.retry_base_delay.saturating_mul(multiplier).min(MAX_RETRY_DELAY)
    }

    fn request_body(&self, invocation: &ToolInvocation) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": invocation.system,
            "messages": [{ "role": "user", "content": invocation.prompt }],
            "tools": [invocation.tool],
            "tool_choice": { "type": "tool", "name": invocation.tool.name },
        })
    }

    async fn send_once(&self, body: &Value, tool: &str) -> Result<Option<Value>, AssistantError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|error| AssistantError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Api { status: status.as_u16(), body });
        }

        let payload: MessagesResponse =
            response.json().await.map_err(|error| AssistantError::Decode(error.to_string()))?;

        Ok(payload.content.into_iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == tool => Some(input),
            _ => None,
        }))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke_tool(
        &self,
        invocation: ToolInvocation,
    ) -> Result<Option<Value>, AssistantError> {
        let body = self.request_body(&invocation);
        let mut attempt = 0;

        loop {
            match self.send_once(&body, &invocation.tool.name).await {
                Ok(result) => {
                    debug!(
                        event_name = "assistant.llm.tool_result",
                        tool = %invocation.tool.name,
                        produced = result.is_some(),
                        "tool invocation finished"
                    );
                    return Ok(result);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        event_name = "assistant.llm.retry",
                        tool = %invocation.tool.name,
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "tool invocation failed, retrying"
                    );
                    let delay = self.retry_delay(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tokio::sync::Mutex;

    use super::{AnthropicClient, LlmClient, ToolInvocation, ToolSpec};
    use crate::error::AssistantError;
    use procura_core::config::{AssistantBackendKind, AssistantConfig};

    #[derive(Default)]
    struct FakeApi {
        failures_before_success: usize,
        failure_status: u16,
        calls: AtomicUsize,
        last_request: Mutex<Option<(HeaderMap, Value)>>,
    }

    async fn spawn_api(api: Arc<FakeApi>) -> String {
        let app = Router::new().route(
            "/v1/messages",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let api = api.clone();
                async move {
                    let call = api.calls.fetch_add(1, Ordering::SeqCst);
                    *api.last_request.lock().await = Some((headers, body));
                    if call < api.failures_before_success {
                        let status = StatusCode::from_u16(api.failure_status)
                            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                        return (status, "overloaded").into_response();
                    }
                    Json(json!({
                        "content": [
                            { "type": "text", "text": "here you go" },
                            { "type": "tool_use", "id": "tu_1", "name": "compose_message",
                              "input": { "message": "hello" } }
                        ],
                        "stop_reason": "tool_use"
                    }))
                    .into_response()
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{address}")
    }

    fn client(base_url: String, max_retries: u32) -> AnthropicClient {
        AnthropicClient::from_config(&AssistantConfig {
            backend: AssistantBackendKind::Anthropic,
            api_key: Some(SecretString::from("sk-test".to_owned())),
            base_url,
            model: "test-model".to_owned(),
            timeout_secs: 5,
            max_retries,
        })
        .expect("client")
        .with_retry_base_delay(Duration::ZERO)
    }

    fn invocation() -> ToolInvocation {
        ToolInvocation {
            system: "You write messages.".to_owned(),
            prompt: "Write one.".to_owned(),
            tool: ToolSpec {
                name: "compose_message".to_owned(),
                description: "Compose".to_owned(),
                input_schema: json!({ "type": "object" }),
            },
        }
    }

    #[tokio::test]
    async fn forces_the_tool_and_returns_its_input() {
        let api = Arc::new(FakeApi::default());
        let client = client(spawn_api(api.clone()).await, 0);

        let result = client.invoke_tool(invocation()).await.expect("invoke");
        assert_eq!(result, Some(json!({ "message": "hello" })));

        let guard = api.last_request.lock().await;
        let (headers, body) = guard.as_ref().expect("request captured");
        assert_eq!(headers.get("x-api-key").and_then(|v| v.to_str().ok()), Some("sk-test"));
        assert!(headers.get("anthropic-version").is_some());
        assert_eq!(body["tool_choice"], json!({ "type": "tool", "name": "compose_message" }));
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["tools"][0]["name"], "compose_message");
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let api = Arc::new(FakeApi {
            failures_before_success: 2,
            failure_status: 503,
            ..FakeApi::default()
        });
        let client = client(spawn_api(api.clone()).await, 2);

        let result = client.invoke_tool(invocation()).await.expect("third attempt succeeds");
        assert!(result.is_some());
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let api = Arc::new(FakeApi {
            failures_before_success: 5,
            failure_status: 400,
            ..FakeApi::default()
        });
        let client = client(spawn_api(api.clone()).await, 3);

        let error = client.invoke_tool(invocation()).await.expect_err("bad request");
        assert!(matches!(error, AssistantError::Api { status: 400, .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let result = AnthropicClient::from_config(&AssistantConfig {
            backend: AssistantBackendKind::Anthropic,
            api_key: None,
            base_url: "https://api.anthropic.com".to_owned(),
            model: "m".to_owned(),
            timeout_secs: 5,
            max_retries: 0,
        });
        assert!(matches!(result, Err(AssistantError::Configuration(_))));
    }
}
