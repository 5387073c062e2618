//! 会话过程事件：供 CLI / 前端实时展示模型轮次、工具调用与结果

use serde::Serialize;

use crate::session::SessionStatus;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// 正在调用模型（第几轮）
    Thinking { iteration: usize, max_iterations: usize },
    /// 分发工具
    ToolCall {
        id: String,
        tool: String,
        input: serde_json::Value,
    },
    /// 工具结果（预览，避免过长）
    ToolResult {
        id: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    /// 模型未结束也未调用工具，追加了继续指令
    Continuation { iteration: usize },
    Terminated { status: SessionStatus, records: usize },
}

/// 截断到指定字符数（按字符而非字节）
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let ev = SessionEvent::Terminated {
            status: SessionStatus::BudgetExhausted,
            records: 3,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "terminated");
        assert_eq!(json["status"], "budget_exhausted");
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("短文本", 10), "短文本");
        assert_eq!(preview("春季新品发布会", 2), "春季...");
    }
}
