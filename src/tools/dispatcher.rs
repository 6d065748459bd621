use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::models::{ToolInvocation, ToolResponse};
use crate::tools::error::ToolError;
use crate::tools::fs::{list_directory, read_file, write_file, DEFAULT_MAX_CHARS};
use crate::tools::runner::{run_script, ScriptConfig};
use crate::tools::safety::SandboxRoot;
use crate::tools::schemas::{tool_catalog, ToolSpec};

/// The closed set of tools the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ListDirectory,
    ReadFile,
    WriteFile,
    RunScript,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::ListDirectory,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::RunScript,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::ListDirectory => "get_files_info",
            ToolKind::ReadFile => "get_file_content",
            ToolKind::WriteFile => "write_file",
            ToolKind::RunScript => "run_python_file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Everything a tool needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub root: SandboxRoot,
    pub max_chars: usize,
    pub script: ScriptConfig,
}

impl ToolConfig {
    pub fn new(root: SandboxRoot) -> Self {
        Self {
            root,
            max_chars: DEFAULT_MAX_CHARS,
            script: ScriptConfig::default(),
        }
    }
}

/// Result of one dispatched invocation.
#[derive(Debug)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: Result<String, ToolError>,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// The text the model sees.
    pub fn payload(&self) -> String {
        match &self.outcome {
            Ok(text) => text.clone(),
            Err(e) => format!("Error: {e}"),
        }
    }

    pub fn to_response(&self) -> ToolResponse {
        ToolResponse {
            call_id: self.call_id.clone(),
            name: self.name.clone(),
            content: self.payload(),
            error: self.outcome.as_ref().err().map(|e| e.kind().to_string()),
        }
    }
}

/// Routes invocations to tool handlers with the sandbox root injected.
///
/// `dispatch` always returns a [`ToolResult`]: unknown tools, bad arguments
/// and panics inside a handler all come back as error results.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<ToolConfig>,
    #[cfg(test)]
    panic_on: Option<ToolKind>,
}

impl Dispatcher {
    pub fn new(config: ToolConfig) -> Self {
        Self {
            config: Arc::new(config),
            #[cfg(test)]
            panic_on: None,
        }
    }

    pub fn root(&self) -> &SandboxRoot {
        &self.config.root
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        tool_catalog(&self.config.script.extension)
    }

    pub async fn dispatch(&self, invocation: &ToolInvocation) -> ToolResult {
        let outcome = match ToolKind::from_name(&invocation.name) {
            Some(kind) => {
                let call = self.invoke(kind, invocation.arguments.clone());
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(ToolError::Internal {
                        tool: invocation.name.clone(),
                        message: panic_message(panic.as_ref()),
                    }),
                }
            }
            None => Err(ToolError::UnknownTool {
                name: invocation.name.clone(),
            }),
        };

        match &outcome {
            Ok(_) => tracing::debug!(tool = %invocation.name, "tool succeeded"),
            Err(e) => tracing::debug!(tool = %invocation.name, kind = e.kind(), error = %e, "tool failed"),
        }

        ToolResult {
            call_id: invocation.id.clone(),
            name: invocation.name.clone(),
            outcome,
        }
    }

    async fn invoke(
        &self,
        kind: ToolKind,
        arguments: Map<String, Value>,
    ) -> Result<String, ToolError> {
        #[cfg(test)]
        if self.panic_on == Some(kind) {
            panic!("{} handler blew up", kind.name());
        }

        let config = &self.config;
        match kind {
            ToolKind::ListDirectory => {
                list_directory(&config.root, parse_args(kind, arguments)?).await
            }
            ToolKind::ReadFile => {
                read_file(&config.root, parse_args(kind, arguments)?, config.max_chars).await
            }
            ToolKind::WriteFile => write_file(&config.root, parse_args(kind, arguments)?).await,
            ToolKind::RunScript => {
                run_script(
                    &config.root,
                    parse_args(kind, arguments)?,
                    &config.script,
                    config.max_chars,
                )
                .await
            }
        }
    }
}

/// Unknown keys (including any caller-supplied working directory) are ignored.
fn parse_args<T: DeserializeOwned>(
    kind: ToolKind,
    arguments: Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(arguments)).map_err(|e| ToolError::InvalidArguments {
        tool: kind.name().to_string(),
        message: e.to_string(),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
