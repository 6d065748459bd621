use serde::Serialize;
use serde_json::{json, Value};

use crate::tools::dispatcher::ToolKind;

/// A tool as advertised to the model: name, description and JSON-schema
/// parameters. The working directory never appears here; the dispatcher
/// supplies it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: String,
    pub parameters: Value,
}

pub fn tool_catalog(script_extension: &str) -> Vec<ToolSpec> {
    vec![
        list_directory_schema(),
        read_file_schema(),
        write_file_schema(),
        run_script_schema(script_extension),
    ]
}

fn list_directory_schema() -> ToolSpec {
    ToolSpec {
        name: ToolKind::ListDirectory.name(),
        description: "Lists files in the specified directory along with their sizes, \
                      constrained to the working directory."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "The directory to list files from, relative to the working directory. \
                                    If not provided, lists files in the working directory itself."
                }
            }
        }),
    }
}

fn read_file_schema() -> ToolSpec {
    ToolSpec {
        name: ToolKind::ReadFile.name(),
        description: "Reads the content of a file, constrained to the working directory. \
                      Long files are truncated."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to read, relative to the working directory"
                }
            },
            "required": ["file_path"]
        }),
    }
}

fn write_file_schema() -> ToolSpec {
    ToolSpec {
        name: ToolKind::WriteFile.name(),
        description: "Writes content to a file, creating it and any missing parent directories \
                      or overwriting it if it exists. Constrained to the working directory."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to write, relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "The full content to write to the file"
                }
            },
            "required": ["file_path", "content"]
        }),
    }
}

fn run_script_schema(extension: &str) -> ToolSpec {
    ToolSpec {
        name: ToolKind::RunScript.name(),
        description: format!(
            "Executes a .{extension} file with optional arguments, relative to the working \
             directory, and returns its output. Runs are limited to a fixed time budget."
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": format!("Path of the .{extension} file to execute, relative to the working directory")
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional list of arguments passed to the script"
                }
            },
            "required": ["file_path"]
        }),
    }
}
