// src/errors.rs
use thiserror::Error;

/// Why a cycle stopped before persisting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleError {
    #[error("fetch stage failed: {0}")]
    Fetch(String),
    #[error("record store failed: {0}")]
    Persistence(String),
    #[error("configuration unavailable: {0}")]
    Configuration(String),
}

impl CycleError {
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Self::Fetch(err.to_string())
    }

    pub fn persistence(err: &anyhow::Error) -> Self {
        Self::Persistence(format!("{:#}", err))
    }

    pub fn configuration(err: &anyhow::Error) -> Self {
        Self::Configuration(format!("{:#}", err))
    }
}
