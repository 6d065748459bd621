use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::llm::LlmConfig;
use crate::tools::fs::DEFAULT_MAX_CHARS;
use crate::tools::runner::DEFAULT_TIMEOUT_SECS;
use crate::tools::{SandboxRoot, ScriptConfig, ToolConfig};
use crate::workflows::DEFAULT_MAX_TURNS;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot resolve working directory {}: {source}", .path.display())]
    Resolve { path: PathBuf, source: io::Error },
    #[error("working directory {} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },
    #[error("max_turns must be at least 1")]
    ZeroTurns,
    #[error("API key not set in the config file or the GEMINI_API_KEY environment variable")]
    MissingApiKey,
}

/// On-disk settings (TOML). Every field has a default, so an empty file or
/// no file at all is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_timeout_secs")]
    pub script_timeout_secs: u64,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_working_directory() -> PathBuf { PathBuf::from(".") }
fn default_max_chars() -> usize { DEFAULT_MAX_CHARS }
fn default_max_turns() -> usize { DEFAULT_MAX_TURNS }
fn default_timeout_secs() -> u64 { DEFAULT_TIMEOUT_SECS }
fn default_interpreter() -> String { "python3".to_string() }
fn default_script_extension() -> String { "py".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            max_chars: default_max_chars(),
            max_turns: default_max_turns(),
            script_timeout_secs: default_timeout_secs(),
            interpreter: default_interpreter(),
            script_extension: default_script_extension(),
            llm: LlmConfig::default(),
        }
    }
}

/// The resolved configuration handed to the dispatcher and orchestrator.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub tools: ToolConfig,
    pub max_turns: usize,
}

impl Settings {
    /// Read settings from `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        if self.max_turns == 0 {
            return Err(ConfigError::ZeroTurns);
        }
        if !self.working_directory.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: self.working_directory.clone(),
            });
        }
        let root = SandboxRoot::new(&self.working_directory).map_err(|source| {
            ConfigError::Resolve {
                path: self.working_directory.clone(),
                source,
            }
        })?;

        Ok(AgentConfig {
            tools: ToolConfig {
                root,
                max_chars: self.max_chars,
                script: ScriptConfig {
                    interpreter: self.interpreter.clone(),
                    extension: self.script_extension.trim_start_matches('.').to_string(),
                    timeout: Duration::from_secs(self.script_timeout_secs),
                },
            },
            max_turns: self.max_turns,
        })
    }

    /// The key from the config file if set, otherwise `GEMINI_API_KEY`.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key_or(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_or(&self, env_value: Option<String>) -> Result<String, ConfigError> {
        self.llm
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or(env_value.filter(|k| !k.is_empty()))
            .ok_or(ConfigError::MissingApiKey)
    }
}
