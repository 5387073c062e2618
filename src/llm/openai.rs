//! OpenAI 兼容模型传输
//!
//! 通过 async_openai 的 BYOT 接口调用任意 OpenAI 兼容端点（可配置 base_url），
//! 请求 / 回复的 JSON 由本模块自行组装与解析，工具定义以 function calling 形式下发。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    Message, ModelRequest, ModelResponse, ModelTransport, Role, StopSignal, ToolInvocation,
    TransportError,
};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容传输：持有 Client、model 名与单次请求超时
pub struct OpenAiTransport {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    pub usage: TokenUsage,
}

impl OpenAiTransport {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            usage: TokenUsage::new(),
        }
    }

    /// 从环境变量 `OPENAI_API_KEY` 读取凭据；缺失时返回 MissingCredentials（模型传输是必需的）
    pub fn from_env(
        base_url: Option<&str>,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TransportError::MissingCredentials("OPENAI_API_KEY".to_string()))?;
        Ok(Self::new(base_url, model, &api_key, timeout_secs))
    }

    fn build_request(&self, request: &ModelRequest<'_>) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": request.system })];
        messages.extend(request.messages.iter().map(to_wire_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|def| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": def.name,
                            "description": def.description,
                            "parameters": def.parameters_schema(),
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

fn to_wire_message(m: &Message) -> Value {
    match m.role {
        Role::System => json!({ "role": "system", "content": m.content }),
        Role::User => json!({ "role": "user", "content": m.content }),
        Role::Assistant if m.tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": m.content })
        }
        Role::Assistant => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": { "name": tc.name, "arguments": tc.input.to_string() }
                    })
                })
                .collect();
            let content = if m.content.is_empty() {
                Value::Null
            } else {
                Value::String(m.content.clone())
            };
            json!({ "role": "assistant", "content": content, "tool_calls": calls })
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
            "content": m.content,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// 将 API 回复转为 ModelResponse；arguments 不是合法 JSON 时保留为字符串，交给 Dispatcher 校验报错
fn into_model_response(resp: ChatResponse) -> Result<ModelResponse, TransportError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::Decode("response has no choices".to_string()))?;

    let tool_calls: Vec<ToolInvocation> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or(Value::String(tc.function.arguments));
            ToolInvocation::new(tc.id, tc.function.name, input)
        })
        .collect();

    let stop = match choice.finish_reason.as_deref() {
        _ if !tool_calls.is_empty() => StopSignal::ToolUse,
        Some("stop") => StopSignal::Complete,
        _ => StopSignal::Continue,
    };

    Ok(ModelResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop,
    })
}

fn map_openai_error(e: OpenAIError) -> TransportError {
    match e {
        OpenAIError::ApiError(api) => TransportError::Api(api.message),
        other => TransportError::Http(other.to_string()),
    }
}

#[async_trait]
impl ModelTransport for OpenAiTransport {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn respond(&self, request: ModelRequest<'_>) -> Result<ModelResponse, TransportError> {
        let body = self.build_request(&request);
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "model request"
        );

        let response: ChatResponse =
            tokio::time::timeout(self.timeout, self.client.chat().create_byot(body))
                .await
                .map_err(|_| TransportError::Timeout(self.timeout.as_secs()))?
                .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        into_model_response(response)
    }
}
