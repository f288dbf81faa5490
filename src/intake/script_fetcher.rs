// src/intake/script_fetcher.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::SourceFetcher;
use crate::llm::payload::parse_payload;
use crate::types::RawJob;

/// Runs the external fetcher script and reads a JSON array of postings from
/// its stdout.
///
/// The script file is the live fetcher source that self-repair rewrites, so it
/// is re-read by the interpreter on every call and never cached here.
pub struct ScriptFetcher {
    program: String,
    script: PathBuf,
}

impl ScriptFetcher {
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }

    fn parse_output(stdout: &str, source: &str) -> Result<Vec<RawJob>> {
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }

        parse_payload::<Vec<RawJob>>(stdout)
            .with_context(|| format!("Fetcher output for {} is not a JSON array of postings", source))
    }
}

#[async_trait]
impl SourceFetcher for ScriptFetcher {
    async fn fetch(
        &self,
        keyword: &str,
        source: &str,
        limit: Option<usize>,
    ) -> Result<Vec<RawJob>> {
        info!("Fetching '{}' from {}", keyword, source);

        let mut command = Command::new(&self.program);
        command
            .arg(&self.script)
            .arg("--keyword")
            .arg(keyword)
            .arg("--source")
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // a timed-out fetch drops this future; take the child with it
            .kill_on_drop(true);

        if let Some(limit) = limit {
            command.arg("--limit").arg(limit.to_string());
        }

        let output = command.output().await.with_context(|| {
            format!(
                "Failed to launch fetcher {} {}",
                self.program,
                self.script.display()
            )
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Fetcher stderr for {}: {}", source, stderr.trim());
        }

        if !output.status.success() {
            warn!("Fetcher exited with {} for {}", output.status, source);
            anyhow::bail!(
                "Fetcher exited with {} for source {}: {}",
                output.status,
                source,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let jobs = Self::parse_output(&stdout, source)?;
        info!("Fetcher returned {} postings from {}", jobs.len(), source);
        Ok(jobs)
    }
}
