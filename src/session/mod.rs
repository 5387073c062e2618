//! 会话层：配置、主循环、结果累加、进度上报与过程事件

pub mod accumulator;
pub mod config;
pub mod events;
pub mod loop_;
pub mod progress;
pub mod result;

pub use accumulator::ResultAccumulator;
pub use config::{CampaignBrief, SessionConfig, SessionKind, CONTINUE_PROMPT};
pub use events::SessionEvent;
pub use loop_::{ConversationLoop, BUDGET_SKIP_MESSAGE};
pub use progress::{percent, ProgressCallback, ProgressReporter, ProgressUpdate};
pub use result::{SessionResult, SessionStatus, UsageSummary};
