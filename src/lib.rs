// src/lib.rs
pub mod cli;
pub mod core;
pub mod environment;
pub mod errors;
pub mod export;
pub mod intake;
pub mod llm;
pub mod pipeline;
pub mod types;

#[cfg(test)]
mod testing;

pub use environment::EnvironmentConfig;
pub use errors::CycleError;
pub use pipeline::{CycleOutcome, Orchestrator, PipelineStatus};
