//! 会话结果

use serde::{Deserialize, Serialize};

use crate::content::{ContentRecord, ContentStatus};
use crate::llm::Message;

/// 会话终止原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// 模型发出结束信号
    Complete,
    /// 达到模型轮数上限或内容条数上限
    BudgetExhausted,
    Cancelled,
    /// 超过墙钟上限
    DeadlineExceeded,
}

impl SessionStatus {
    /// 非模型主动结束的终态
    pub fn is_degraded(&self) -> bool {
        !matches!(self, SessionStatus::Complete)
    }
}

/// Token 用量（本次会话增量）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 会话结果：完成顺序的内容记录 + 终止状态
#[derive(Clone, Debug, Serialize)]
pub struct SessionResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub records: Vec<ContentRecord>,
    /// 模型最后的总结文本
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// 模型调用轮数
    pub iterations: usize,
    /// 占用后端调用槽位的工具调用数
    pub dispatched: usize,
    /// 未产生记录的失败调用数（未知工具、参数不合法等）
    pub rejected: usize,
    pub usage: UsageSummary,
    /// 完整对话（研究助手可据此继续下一轮）
    #[serde(skip)]
    pub messages: Vec<Message>,
}

impl SessionResult {
    pub fn completed(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.iter().filter(|r| r.status == ContentStatus::Complete)
    }

    pub fn degraded(&self) -> impl Iterator<Item = &ContentRecord> {
        self.records.iter().filter(|r| r.status != ContentStatus::Complete)
    }
}
