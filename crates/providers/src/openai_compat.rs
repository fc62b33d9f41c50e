//! OpenAI-compatible chat-completions gateway.
//!
//! Works with: OpenAI, Azure OpenAI, and any endpoint exposing an
//! OpenAI-compatible `/chat/completions` route (vLLM, llama.cpp, Ollama).
//!
//! Supports:
//! - Non-streaming chat completions
//! - Tool calling, with history rendered in the provider's message format

use async_trait::async_trait;
use concierge_core::context::ContextSnapshot;
use concierge_core::error::GatewayError;
use concierge_core::function::FunctionCallRequest;
use concierge_core::gateway::{LanguageModelGateway, ModelReply};
use concierge_core::message::{ConversationTurn, Role, TurnContent};
use concierge_core::schema::FunctionDefinition;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Seconds to wait after a 429 when the provider sends no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure OpenAI)
    ApiKeyHeader,
}

/// A gateway to any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiGateway {
    name: String,
    url: String,
    api_key: String,
    auth: Auth,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiGateway {
    /// Create a gateway for `{base_url}/chat/completions`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Self::with_url(name, url, api_key, Auth::Bearer)
    }

    /// OpenAI (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Azure OpenAI deployment (convenience constructor).
    pub fn azure(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: impl Into<String>,
    ) -> Self {
        let url = format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
            endpoint.trim_end_matches('/')
        );
        // The deployment fixes the model; the body field is ignored by Azure.
        Self::with_url("azure", url, api_key, Auth::ApiKeyHeader).with_model(deployment)
    }

    fn with_url(
        name: impl Into<String>,
        url: String,
        api_key: impl Into<String>,
        auth: Auth,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            url,
            api_key: api_key.into(),
            auth,
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: None,
            client,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Convert conversation turns to OpenAI API messages.
    fn to_api_messages(turns: &[ConversationTurn]) -> Vec<ApiMessage> {
        turns
            .iter()
            .map(|turn| match &turn.content {
                TurnContent::FunctionResult(result) => ApiMessage {
                    role: "tool".into(),
                    content: Some(result.to_model_content()),
                    tool_calls: None,
                    tool_call_id: Some(result.call_id.clone()),
                },
                TurnContent::Text(text) => {
                    let role = match turn.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant | Role::FunctionResult => "assistant",
                    };
                    let tool_calls: Option<Vec<ApiToolCall>> = (!turn.function_calls.is_empty())
                        .then(|| {
                            turn.function_calls
                                .iter()
                                .map(|call| ApiToolCall {
                                    id: call.call_id.clone(),
                                    r#type: "function".into(),
                                    function: ApiFunction {
                                        name: call.name.clone(),
                                        arguments: encode_arguments(&call.arguments),
                                    },
                                })
                                .collect()
                        });
                    // Assistant call turns with no text send `content: null`.
                    let content = if tool_calls.is_some() && text.is_empty() {
                        None
                    } else {
                        Some(text.clone())
                    };
                    ApiMessage {
                        role: role.into(),
                        content,
                        tool_calls,
                        tool_call_id: None,
                    }
                }
            })
            .collect()
    }

    /// Convert function definitions to OpenAI API tools.
    fn to_api_tools(functions: &[FunctionDefinition]) -> Vec<serde_json::Value> {
        functions
            .iter()
            .map(|f| serde_json::json!({"type": "function", "function": f.to_tool_schema()}))
            .collect()
    }

    fn build_body(
        &self,
        context: &ContextSnapshot,
        functions: &[FunctionDefinition],
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(context.turns()),
            "temperature": self.temperature,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !functions.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(functions));
        }

        body
    }
}

/// Arguments are sent back as the JSON text the model originally produced.
fn encode_arguments(arguments: &serde_json::Value) -> String {
    match arguments {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Parse tool-call argument text; unparseable text is kept verbatim so the
/// dispatcher can reject it with a validation error.
fn decode_arguments(raw: String) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
}

fn parse_reply(api_response: ApiResponse) -> Result<ModelReply, GatewayError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::InvalidResponse("No choices in response".into()))?;

    let tool_calls = choice.message.tool_calls.unwrap_or_default();
    if !tool_calls.is_empty() {
        let requests = tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = decode_arguments(tc.function.arguments);
                FunctionCallRequest::new(tc.id, tc.function.name, arguments)
            })
            .collect();
        let content = choice.message.content.filter(|c| !c.trim().is_empty());
        return Ok(ModelReply::Calls { requests, content });
    }

    match choice.message.content {
        Some(content) => Ok(ModelReply::Text { content }),
        None => Err(GatewayError::InvalidResponse(
            "Reply has neither content nor tool calls".into(),
        )),
    }
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

#[async_trait]
impl LanguageModelGateway for OpenAiGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        context: &ContextSnapshot,
        functions: &[FunctionDefinition],
    ) -> Result<ModelReply, GatewayError> {
        let body = self.build_body(context, functions);

        debug!(
            gateway = %self.name,
            model = %self.model,
            turns = context.len(),
            functions = functions.len(),
            "Sending completion request"
        );

        let request = self.client.post(&self.url).json(&body);
        let request = match self.auth {
            Auth::Bearer => request.bearer_auth(&self.api_key),
            Auth::ApiKeyHeader => request.header("api-key", &self.api_key),
        };

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Provider(format!("Network error: {e}")))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = retry_after_secs(&response);
            warn!(gateway = %self.name, retry_after_secs, "Rate limited by provider");
            return Err(GatewayError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(GatewayError::Provider(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(GatewayError::Provider(format!("HTTP {status}: {error_body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        if let Some(usage) = &api_response.usage {
            debug!(
                model = %api_response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "Token usage"
            );
        }

        parse_reply(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    // Always serialized: assistant call messages carry an explicit null.
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default = "function_type")]
    r#type: String,
    function: ApiFunction,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
