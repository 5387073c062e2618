//! 归一化内容记录
//!
//! 每次工具调用（成功、失败或降级）最多产生一条 ContentRecord，追加到 ResultAccumulator 后不可再修改；
//! 需要更正时追加新记录，而不是原地编辑。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 内容类型（与后端能力一一对应）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Video,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::Video => "video",
        };
        f.write_str(s)
    }
}

/// 记录状态：complete 为正常产出；error / skipped 为降级结果
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Complete,
    Error,
    Skipped,
}

/// 归一化内容记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentRecord {
    /// 产生该记录的工具调用 id
    pub invocation_id: String,
    pub platform: String,
    pub kind: ContentKind,
    /// 正文（text）或媒体地址（image / video）；失败时为空
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub status: ContentStatus,
    /// 失败 / 跳过 / 降级原因（人类可读）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn complete(
        invocation_id: impl Into<String>,
        platform: impl Into<String>,
        kind: ContentKind,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            platform: platform.into(),
            kind,
            payload: payload.into(),
            caption: None,
            tags: Vec::new(),
            status: ContentStatus::Complete,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn error(
        invocation_id: impl Into<String>,
        platform: impl Into<String>,
        kind: ContentKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ContentStatus::Error,
            reason: Some(reason.into()),
            ..Self::complete(invocation_id, platform, kind, String::new())
        }
    }

    pub fn skipped(
        invocation_id: impl Into<String>,
        platform: impl Into<String>,
        kind: ContentKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ContentStatus::Skipped,
            reason: Some(reason.into()),
            ..Self::complete(invocation_id, platform, kind, String::new())
        }
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == ContentStatus::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_record_carries_reason() {
        let rec = ContentRecord::error("call_1", "instagram", ContentKind::Image, "HTTP 500");
        assert_eq!(rec.status, ContentStatus::Error);
        assert!(rec.payload.is_empty());
        assert_eq!(rec.reason.as_deref(), Some("HTTP 500"));
        assert!(!rec.is_complete());
    }

    #[test]
    fn test_record_serializes_snake_case() {
        let rec = ContentRecord::complete("call_2", "linkedin", ContentKind::Text, "hello")
            .with_tags(vec!["#launch".to_string()]);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["status"], "complete");
        assert_eq!(json["tags"][0], "#launch");
        assert!(json.get("caption").is_none());
    }
}
