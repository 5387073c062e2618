pub mod builtin;
pub mod dispatcher;
pub mod poller;
pub mod registry;

pub use builtin::{builtin_tools, supported_platforms};
pub use dispatcher::{placeholder_locator, DispatchOutcome, DispatchSettings, ToolDispatcher};
pub use poller::{JobPoller, PollOutcome, PollPolicy};
pub use registry::{FieldSpec, FieldType, ToolDefinition, ToolRegistry};
