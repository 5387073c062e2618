//! 模型传输层：抽象、消息类型与实现（OpenAI 兼容 / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use mock::{ScriptStep, ScriptedTransport};
pub use openai::{OpenAiTransport, TokenUsage};
pub use traits::{ModelTransport, TransportError};
pub use types::{Message, ModelRequest, ModelResponse, Role, StopSignal, ToolInvocation};
