//! A sandboxed, tool-using coding agent.
//!
//! The [`workflows::Orchestrator`] alternates between a [`llm::ModelService`]
//! and the [`tools::Dispatcher`], which runs file and script tools confined to
//! one working directory.

pub mod config;
pub mod db;
pub mod llm;
pub mod models;
pub mod tools;
pub mod transcript;
pub mod workflows;
