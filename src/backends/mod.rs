//! 生成后端层：统一抽象与实现（OpenAI 兼容文本 / HTTP 图片与视频 / Mock）

pub mod http;
pub mod job;
pub mod mock;
pub mod openai;
pub mod traits;

pub use http::{HttpImageBackend, HttpVideoBackend};
pub use job::{AsyncJobHandle, JobState, JobStatus};
pub use mock::{MockImageBackend, MockTextBackend, MockVideoBackend};
pub use openai::OpenAiTextBackend;
pub use traits::{
    AsyncBackend, BackendError, BackendSet, Capability, GenerationBackend, GenerationOutput,
    GenerationRequest, ImageRequest, SyncBackend, TextRequest, VideoRequest,
};
