use std::io;

use crate::tools::safety::ContainmentError;

/// A tool call that did not succeed but leaves the run intact.
///
/// These never abort the loop. The dispatcher renders them as text so the
/// model can read the failure and decide what to do next.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Cannot {action} \"{}\" as it is outside the permitted working directory", .source.path)]
    Containment {
        action: &'static str,
        source: ContainmentError,
    },
    #[error("\"{path}\" is not a directory")]
    NotADirectory { path: String },
    #[error("File not found or is not a regular file: \"{path}\"")]
    NotAFile { path: String },
    #[error("Cannot write to \"{path}\" as it is a directory")]
    IsADirectory { path: String },
    #[error("\"{path}\" is not a .{extension} file")]
    WrongFileType { path: String, extension: String },
    #[error("Execution of \"{path}\" timed out (exceeded {secs} seconds)")]
    Timeout { path: String, secs: u64 },
    #[error("Failed to execute \"{path}\": {message}")]
    Execution { path: String, message: String },
    #[error("Failed to read directory \"{path}\": {source}")]
    List { path: String, source: io::Error },
    #[error("Failed to read \"{path}\": {message}")]
    Read { path: String, message: String },
    #[error("Failed to write \"{path}\" ({chars} characters attempted): {source}")]
    Write {
        path: String,
        chars: usize,
        source: io::Error,
    },
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("Unknown function: {name}")]
    UnknownTool { name: String },
    #[error("Internal error in {tool}: {message}")]
    Internal { tool: String, message: String },
}

impl ToolError {
    pub(crate) fn containment(action: &'static str, source: ContainmentError) -> Self {
        ToolError::Containment { action, source }
    }

    /// Short machine-friendly tag, used in logs and the transcript store.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Containment { .. } => "containment",
            ToolError::NotADirectory { .. } => "not_a_directory",
            ToolError::NotAFile { .. } => "not_a_file",
            ToolError::IsADirectory { .. } => "is_a_directory",
            ToolError::WrongFileType { .. } => "wrong_file_type",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Execution { .. } => "execution",
            ToolError::List { .. } => "list",
            ToolError::Read { .. } => "read",
            ToolError::Write { .. } => "write",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::UnknownTool { .. } => "unknown_tool",
            ToolError::Internal { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_containment_message_names_original_path() {
        let err = ToolError::containment(
            "read",
            ContainmentError {
                path: "../secret".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "Cannot read \"../secret\" as it is outside the permitted working directory"
        );
        assert_eq!(err.kind(), "containment");
    }

    #[test]
    fn test_write_error_includes_char_count() {
        let err = ToolError::Write {
            path: "out.txt".into(),
            chars: 42,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("42 characters"), "{msg}");
        assert!(msg.contains("out.txt"), "{msg}");
    }
}
