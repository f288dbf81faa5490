// src/llm/mod.rs
//! Text-completion capability used for scoring, classification, profile
//! building and repair proposals

pub mod client;
pub mod payload;

use anyhow::Result;
use async_trait::async_trait;

pub use client::LlmClient;
pub use payload::{extract_json, parse_payload, PayloadError};

#[async_trait]
pub trait Completion: Send + Sync {
    /// Complete a prompt and return the raw text response
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete with a specific model; `None` uses the default
    async fn complete_with_model(&self, prompt: &str, model: Option<&str>) -> Result<String> {
        let _ = model;
        self.complete(prompt).await
    }
}
