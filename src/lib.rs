//! Campaign Agent - 营销内容生成的工具编排循环
//!
//! 模块划分：
//! - **agent**: 由配置装配运行时（模型传输 + 后端 + 分发器）
//! - **backends**: 生成后端抽象与实现（文本 / 图片同步，视频异步提交 + 轮询）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **content**: 归一化内容记录
//! - **core**: 错误类型、取消 / 关闭、工具并发调度
//! - **llm**: 模型传输抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **observability**: tracing 初始化
//! - **session**: 会话配置、主循环、结果累加与进度上报
//! - **tools**: 工具注册表、内置工具、分发器与轮询器

pub mod agent;
pub mod backends;
pub mod config;
pub mod content;
pub mod core;
pub mod llm;
pub mod observability;
pub mod session;
pub mod tools;

pub use crate::agent::build_runtime;
pub use crate::content::{ContentKind, ContentRecord, ContentStatus};
pub use crate::core::AgentError;
pub use crate::session::{
    CampaignBrief, ConversationLoop, ProgressReporter, ProgressUpdate, SessionConfig,
    SessionResult, SessionStatus,
};
