pub mod agent;

pub use agent::{Orchestrator, RunError, RunReport, DEFAULT_MAX_TURNS, SYSTEM_PROMPT};
