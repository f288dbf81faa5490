// src/pipeline/corrector.rs
//! Operator-approved repair of the fetcher source
//!
//! One attempt walks `Idle -> Analyzing -> FixProposed -> Applied | Rejected`
//! and returns to `Idle`. The fetcher source is only written after an
//! explicit approval and only after a backup of the current file exists.

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::approval::{ApprovalDecision, ApprovalGate, RepairProposal};
use super::error_tracker::{ErrorEntry, ErrorTracker};
use super::validator::categories;
use crate::core::{AuditLog, FsOps};
use crate::llm::{parse_payload, Completion, PayloadError};

const COMPONENT: &str = "SelfCorrector";

/// Proposals shorter than this are treated as truncated or empty
pub const MIN_FIX_LENGTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Idle,
    Analyzing,
    FixProposed,
    Applied,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    NothingToRepair,
    Applied { category: String, backup: PathBuf },
    Rejected { category: String },
    /// Proposal failed the validity gate; the operator was never asked
    Invalid { category: String, reason: String },
    Aborted { category: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("fetcher source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("repair request failed: {0}")]
    Request(String),
    #[error("repair request timed out after {0:?}")]
    Timeout(Duration),
    #[error("repair response unusable: {0}")]
    Unparsable(#[from] PayloadError),
    #[error("failed to install fix: {0}")]
    Install(String),
}

#[derive(Debug, Deserialize)]
struct ProposalPayload {
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    risk_assessment: String,
    #[serde(default, alias = "fixed_code")]
    fixed_source: String,
}

pub struct SelfCorrector {
    repairer: Arc<dyn Completion>,
    approval: Arc<dyn ApprovalGate>,
    tracker: Arc<ErrorTracker>,
    audit: AuditLog,
    source_path: PathBuf,
    model: Option<String>,
    timeout: Duration,
    state: Mutex<RepairState>,
}

impl SelfCorrector {
    pub fn new(
        repairer: Arc<dyn Completion>,
        approval: Arc<dyn ApprovalGate>,
        tracker: Arc<ErrorTracker>,
        audit: AuditLog,
        source_path: PathBuf,
        model: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            repairer,
            approval,
            tracker,
            audit,
            source_path,
            model,
            timeout,
            state: Mutex::new(RepairState::Idle),
        }
    }

    pub fn state(&self) -> RepairState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn transition(&self, next: RepairState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(from = ?*state, to = ?next, "Repair state change");
        *state = next;
    }

    /// Propose, gate and (on approval) install a fix for the most frequent
    /// repairable failure category
    pub async fn attempt_repair(&self) -> RepairOutcome {
        let Some((category, entry)) = self
            .tracker
            .most_frequent(categories::is_repairable)
            .await
        else {
            self.audit
                .info(COMPONENT, "No recurring errors to repair.")
                .await;
            return RepairOutcome::NothingToRepair;
        };

        self.audit
            .info(
                COMPONENT,
                &format!(
                    "Analyzing '{}' ({} occurrences).",
                    category, entry.count
                ),
            )
            .await;
        self.transition(RepairState::Analyzing);

        let outcome = match self.propose(&category, &entry).await {
            Ok(proposal) => self.review_and_apply(proposal).await,
            Err(e) => {
                self.audit
                    .error(COMPONENT, &format!("Repair analysis failed: {}", e))
                    .await;
                RepairOutcome::Aborted {
                    category,
                    reason: e.to_string(),
                }
            }
        };

        self.transition(RepairState::Idle);
        outcome
    }

    async fn propose(
        &self,
        category: &str,
        entry: &ErrorEntry,
    ) -> Result<RepairProposal, RepairError> {
        let source = FsOps::read_file_safe(&self.source_path)
            .await
            .map_err(|e| RepairError::SourceUnavailable(format!("{:#}", e)))?;

        let prompt = repair_prompt(category, entry, &source);
        let response = tokio::time::timeout(
            self.timeout,
            self.repairer
                .complete_with_model(&prompt, self.model.as_deref()),
        )
        .await
        .map_err(|_| RepairError::Timeout(self.timeout))?
        .map_err(|e| RepairError::Request(format!("{:#}", e)))?;

        let payload: ProposalPayload = parse_payload(&response)?;
        Ok(RepairProposal {
            category: category.to_string(),
            target: self.source_path.clone(),
            analysis: payload.analysis,
            risk_assessment: payload.risk_assessment,
            fixed_source: payload.fixed_source,
        })
    }

    async fn review_and_apply(&self, proposal: RepairProposal) -> RepairOutcome {
        let category = proposal.category.clone();

        let length = proposal.fixed_source.trim().chars().count();
        if length < MIN_FIX_LENGTH {
            let reason = format!(
                "proposed source is {} characters, minimum is {}",
                length, MIN_FIX_LENGTH
            );
            self.audit
                .error(
                    COMPONENT,
                    &format!("Discarding fix for '{}': {}", category, reason),
                )
                .await;
            return RepairOutcome::Invalid { category, reason };
        }

        self.transition(RepairState::FixProposed);
        self.audit
            .info(
                COMPONENT,
                &format!("Fix proposed for '{}'; awaiting operator approval.", category),
            )
            .await;

        if self.approval.review(&proposal).await == ApprovalDecision::Rejected {
            self.transition(RepairState::Rejected);
            self.audit
                .warning(COMPONENT, &format!("Fix for '{}' rejected.", category))
                .await;
            return RepairOutcome::Rejected { category };
        }

        match self.install(&proposal).await {
            Ok(backup) => {
                self.transition(RepairState::Applied);
                self.tracker.reset(&category).await;
                self.audit
                    .success(
                        COMPONENT,
                        &format!(
                            "Fix for '{}' applied. Backup at {}",
                            category,
                            backup.display()
                        ),
                    )
                    .await;
                RepairOutcome::Applied { category, backup }
            }
            Err(e) => {
                self.audit
                    .error(COMPONENT, &format!("Repair aborted: {}", e))
                    .await;
                RepairOutcome::Aborted {
                    category,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn install(&self, proposal: &RepairProposal) -> Result<PathBuf, RepairError> {
        let backup = FsOps::backup_file(&proposal.target)
            .await
            .map_err(|e| RepairError::Install(format!("backup failed: {:#}", e)))?;

        if let Err(e) = FsOps::write_file_atomic(&proposal.target, &proposal.fixed_source).await {
            warn!(
                "Fix not written; original remains at {} (backup {})",
                proposal.target.display(),
                backup.display()
            );
            return Err(RepairError::Install(format!("{:#}", e)));
        }

        Ok(backup)
    }
}

fn repair_prompt(category: &str, entry: &ErrorEntry, source: &str) -> String {
    let details = entry
        .details
        .iter()
        .map(|d| format!("- {}", d))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a Senior Python Developer maintaining a web scraper.
The scraper keeps failing with the error category '{category}' ({count} occurrences since {first_seen}).

Recent error details:
{details}

Current scraper source:
```python
{source}
```

Diagnose the failure and propose a fix. Return ONLY a JSON object:
{{
    "analysis": "what is broken and why",
    "risk_assessment": "what could go wrong with the fix",
    "fixed_code": "the COMPLETE corrected file contents"
}}"#,
        category = category,
        count = entry.count,
        first_seen = entry.first_seen.format("%Y-%m-%d %H:%M"),
        details = details,
        source = source,
    )
}
