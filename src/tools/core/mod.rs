// Core tool contracts
pub mod registry;
pub mod spec;
pub mod tool;

pub use registry::ToolRegistry;
pub use spec::{ApprovalKind, ToolGroup, ToolKind};
pub use tool::{HandlerRun, ToolContext, ToolHandler};
