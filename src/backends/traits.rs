//! 生成后端抽象
//!
//! 同步后端（文本、图片）：generate 一次请求一次返回；异步后端（视频）：submit 得到 AsyncJobHandle，再反复 poll。
//! 后端从不 panic 式失败：非 2xx、超时、缺凭据都以 BackendError 返回，由调用方决定降级还是上报。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::backends::{AsyncJobHandle, JobStatus};
use crate::content::ContentKind;

/// 后端错误（单个工具调用级别，可恢复）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend timed out after {0}s")]
    Timeout(u64),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected request: {0}")]
    Rejected(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
}

/// 后端能力：每个工具定义恰好映射到一种能力
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Image,
    Video,
}

impl Capability {
    pub fn kind(self) -> ContentKind {
        match self {
            Capability::Text => ContentKind::Text,
            Capability::Image => ContentKind::Image,
            Capability::Video => ContentKind::Video,
        }
    }

    /// 是否为 submit / poll 语义
    pub fn is_async(self) -> bool {
        matches!(self, Capability::Video)
    }
}

fn default_content_type() -> String {
    "post".to_string()
}

fn default_duration_secs() -> u32 {
    8
}

/// 文本生成请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequest {
    pub platform: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub key_message: String,
    #[serde(default)]
    pub tone: Option<String>,
    /// 最大字符数
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub include_hashtags: bool,
}

/// 图片生成请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub platform: String,
    pub prompt: String,
    /// 尺寸提示，如 1024x1024
    #[serde(default)]
    pub size: Option<String>,
}

/// 视频生成请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRequest {
    pub platform: String,
    pub prompt: String,
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u32,
    /// 画幅，如 16:9 / 9:16
    #[serde(default)]
    pub aspect: Option<String>,
}

/// 后端请求（按能力区分的标签变体）
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationRequest {
    Text(TextRequest),
    Image(ImageRequest),
    Video(VideoRequest),
}

impl GenerationRequest {
    /// 将已通过字段校验的工具输入解码为对应能力的请求。
    ///
    /// 值为 null 的字段按缺省处理（与字段校验一致），由 serde 默认值补齐。
    /// 错误文本不带前缀，由调用方加上工具名。
    pub fn from_input(capability: Capability, input: &Value) -> Result<Self, String> {
        let input = match input {
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        };
        let decoded = match capability {
            Capability::Text => serde_json::from_value(input).map(GenerationRequest::Text),
            Capability::Image => serde_json::from_value(input).map(GenerationRequest::Image),
            Capability::Video => serde_json::from_value(input).map(GenerationRequest::Video),
        };
        decoded.map_err(|e| e.to_string())
    }

    pub fn platform(&self) -> &str {
        match self {
            GenerationRequest::Text(r) => &r.platform,
            GenerationRequest::Image(r) => &r.platform,
            GenerationRequest::Video(r) => &r.platform,
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            GenerationRequest::Text(_) => Capability::Text,
            GenerationRequest::Image(_) => Capability::Image,
            GenerationRequest::Video(_) => Capability::Video,
        }
    }

    /// 图片 / 视频请求的 prompt（文本请求为 key_message）
    pub fn prompt(&self) -> &str {
        match self {
            GenerationRequest::Text(r) => &r.key_message,
            GenerationRequest::Image(r) => &r.prompt,
            GenerationRequest::Video(r) => &r.prompt,
        }
    }
}

/// 同步后端的产出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    /// 正文或媒体地址
    pub payload: String,
    pub caption: Option<String>,
    pub tags: Vec<String>,
    /// 非空表示结果为降级产物（如占位图），内容为原因
    pub degraded: Option<String>,
}

impl GenerationOutput {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }
}

/// 同步后端：一次请求一次返回
#[async_trait]
pub trait SyncBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, BackendError>;
}

/// 异步后端：提交后轮询
#[async_trait]
pub trait AsyncBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &GenerationRequest) -> Result<AsyncJobHandle, BackendError>;

    async fn poll(&self, handle: &AsyncJobHandle) -> Result<JobStatus, BackendError>;
}

/// 统一的后端句柄
#[derive(Clone)]
pub enum GenerationBackend {
    Sync(Arc<dyn SyncBackend>),
    Async(Arc<dyn AsyncBackend>),
}

impl GenerationBackend {
    pub fn name(&self) -> &str {
        match self {
            GenerationBackend::Sync(b) => b.name(),
            GenerationBackend::Async(b) => b.name(),
        }
    }
}

/// 按能力组织的后端集合
#[derive(Clone, Default)]
pub struct BackendSet {
    text: Option<Arc<dyn SyncBackend>>,
    image: Option<Arc<dyn SyncBackend>>,
    video: Option<Arc<dyn AsyncBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.text = Some(backend);
        self
    }

    pub fn with_image(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.image = Some(backend);
        self
    }

    pub fn with_video(mut self, backend: Arc<dyn AsyncBackend>) -> Self {
        self.video = Some(backend);
        self
    }

    pub fn get(&self, capability: Capability) -> Option<GenerationBackend> {
        match capability {
            Capability::Text => self.text.clone().map(GenerationBackend::Sync),
            Capability::Image => self.image.clone().map(GenerationBackend::Sync),
            Capability::Video => self.video.clone().map(GenerationBackend::Async),
        }
    }
}
