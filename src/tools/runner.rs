use serde::Deserialize;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

use crate::tools::error::ToolError;
use crate::tools::fs::is_file;
use crate::tools::safety::{truncate_string, SandboxRoot};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How scripts are launched: `{interpreter} {script} {args...}`.
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub interpreter: String,
    /// Required file extension, without the leading dot.
    pub extension: String,
    pub timeout: Duration,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            extension: "py".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunScriptArgs {
    pub file_path: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub async fn run_script(
    root: &SandboxRoot,
    args: RunScriptArgs,
    script: &ScriptConfig,
    max_chars: usize,
) -> Result<String, ToolError> {
    let full_path = root
        .resolve(&args.file_path)
        .map_err(|e| ToolError::containment("execute", e))?;

    if Path::new(&args.file_path).extension() != Some(OsStr::new(&script.extension)) {
        return Err(ToolError::WrongFileType {
            path: args.file_path,
            extension: script.extension.clone(),
        });
    }

    if !is_file(&full_path).await {
        return Err(ToolError::NotAFile {
            path: args.file_path,
        });
    }

    let execution_err = |message: String| ToolError::Execution {
        path: args.file_path.clone(),
        message,
    };

    let interpreter = which::which(&script.interpreter).map_err(|e| {
        execution_err(format!("interpreter `{}` not found: {e}", script.interpreter))
    })?;

    let start = Instant::now();
    let child = Command::new(&interpreter)
        .arg(&full_path)
        .args(&args.args)
        .current_dir(root.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| execution_err(e.to_string()))?;

    // Dropping the wait future on expiry drops the child, which kills it.
    let output = match timeout(script.timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| execution_err(e.to_string()))?,
        Err(_) => {
            tracing::warn!(script = %args.file_path, "script timed out, killed");
            return Err(ToolError::Timeout {
                path: args.file_path.clone(),
                secs: script.timeout.as_secs(),
            });
        }
    };

    let code = output.status.code().unwrap_or(-1);
    tracing::debug!(
        script = %args.file_path,
        code,
        duration_ms = start.elapsed().as_millis() as u64,
        "script finished"
    );

    if code != 0 {
        return Ok(format!("Process exited with code {code}."));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut sections = vec![];
    if !stdout.is_empty() {
        sections.push(format!("STDOUT:\n{}", cap_output(&stdout, max_chars)));
    }
    if !stderr.is_empty() {
        sections.push(format!("STDERR:\n{}", cap_output(&stderr, max_chars)));
    }

    if sections.is_empty() {
        Ok("No output produced.".to_string())
    } else {
        Ok(sections.join("\n"))
    }
}

fn cap_output(stream: &str, max_chars: usize) -> String {
    let (mut text, truncated) = truncate_string(stream, max_chars);
    if truncated {
        text.push_str(&format!("\n[...output truncated at {max_chars} characters]"));
    }
    text
}
