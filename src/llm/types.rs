//! 模型交互的数据类型：消息、工具调用、请求与回复
//!
//! 与具体厂商的线格式无关；各 ModelTransport 实现负责与自己的 API 互转。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolDefinition;

/// 消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// 工具结果（与某个 ToolInvocation.id 对应）
    Tool,
}

/// 模型请求调用的一个工具
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// 模型 / 传输层分配的关联 id
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolInvocation {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// assistant 消息中模型发起的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// tool 消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// 模型给出的停止 / 继续信号
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSignal {
    /// 自然结束：模型认为任务已完成
    Complete,
    /// 本轮请求了工具，等待结果
    ToolUse,
    /// 未完成（如输出被截断），需要继续
    Continue,
}

/// 发给模型的一次请求
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub tools: &'a [ToolDefinition],
    pub messages: &'a [Message],
}

/// 模型的一次回复
#[derive(Clone, Debug)]
pub struct ModelResponse {
    /// 自然语言内容（可能为空）
    pub content: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub stop: StopSignal,
}

impl ModelResponse {
    /// 自然结束、无工具调用
    pub fn complete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop: StopSignal::Complete,
        }
    }

    /// 无工具调用也未结束
    pub fn incomplete(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop: StopSignal::Continue,
        }
    }

    pub fn tool_use(content: impl Into<String>, tool_calls: Vec<ToolInvocation>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            stop: StopSignal::ToolUse,
        }
    }

    /// 覆盖停止信号（例如一轮里既调用了工具又声明已完成）
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }
}
