//! 模型传输抽象
//!
//! ConversationLoop 只依赖 ModelTransport：发送 system + 工具定义 + 对话历史，取回内容、工具调用与停止信号。
//! 传输失败是致命错误（TransportError），会立即终止会话。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::{ModelRequest, ModelResponse};

/// 与模型通信失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Failed to decode model response: {0}")]
    Decode(String),

    #[error("Model request timed out after {0}s")]
    Timeout(u64),
}

/// 模型传输 trait
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// 一次模型调用
    async fn respond(&self, request: ModelRequest<'_>) -> Result<ModelResponse, TransportError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
