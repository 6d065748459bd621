pub mod dispatcher;
pub mod error;
pub mod fs;
pub mod runner;
pub mod safety;
pub mod schemas;

pub use dispatcher::{Dispatcher, ToolConfig, ToolKind, ToolResult};
pub use error::ToolError;
pub use runner::ScriptConfig;
pub use safety::{ContainmentError, SandboxRoot};
pub use schemas::{tool_catalog, ToolSpec};
