//! 会话级错误类型
//!
//! 只有两类错误会终止会话：启动期配置错误（ConfigError / InvalidToolDefinition）与模型传输失败（Transport）。
//! 单个工具的失败由 ToolDispatcher 吸收为数据（降级记录 + 文本消息），不会出现在这里。

use thiserror::Error;

use crate::llm::TransportError;

/// 会话运行过程中的致命错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    /// 工具定义不合法（重复名称、重复字段、空枚举、无对应后端等），属于启动期错误
    #[error("Invalid tool definition '{tool}': {reason}")]
    InvalidToolDefinition { tool: String, reason: String },

    #[error("Model transport failed: {0}")]
    Transport(#[from] TransportError),
}

impl AgentError {
    pub fn invalid_tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidToolDefinition {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// 是否为启动期（任何模型调用之前）的配置类错误
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AgentError::ConfigError(_) | AgentError::InvalidToolDefinition { .. }
        )
    }
}
