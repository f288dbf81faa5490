// src/pipeline/approval.rs
//! Operator approval for repair proposals
//!
//! The self-corrector never touches the fetcher source on its own: every
//! proposal goes through an [`ApprovalGate`]. Silence counts as a rejection.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::FsOps;

#[derive(Debug, Clone)]
pub struct RepairProposal {
    pub category: String,
    pub target: PathBuf,
    pub analysis: String,
    pub risk_assessment: String,
    pub fixed_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, proposal: &RepairProposal) -> ApprovalDecision;
}

pub struct ApprovalRequest {
    pub proposal: RepairProposal,
    respond: oneshot::Sender<bool>,
}

impl ApprovalRequest {
    pub fn answer(self, approved: bool) {
        // the gate may have timed out already
        let _ = self.respond.send(approved);
    }
}

/// Gate that forwards proposals to whoever holds the matching [`OperatorInbox`]
pub struct OperatorChannel {
    requests: mpsc::Sender<ApprovalRequest>,
    timeout: Duration,
}

pub struct OperatorInbox {
    requests: mpsc::Receiver<ApprovalRequest>,
}

impl OperatorInbox {
    pub async fn recv(&mut self) -> Option<ApprovalRequest> {
        self.requests.recv().await
    }
}

/// Create a gate and its inbox. Dropping the inbox makes every review reject
/// immediately, which is how unattended runs are configured.
pub fn operator_channel(timeout: Duration) -> (OperatorChannel, OperatorInbox) {
    let (tx, rx) = mpsc::channel(1);
    (
        OperatorChannel {
            requests: tx,
            timeout,
        },
        OperatorInbox { requests: rx },
    )
}

#[async_trait]
impl ApprovalGate for OperatorChannel {
    async fn review(&self, proposal: &RepairProposal) -> ApprovalDecision {
        let (tx, rx) = oneshot::channel();
        let request = ApprovalRequest {
            proposal: proposal.clone(),
            respond: tx,
        };

        if self.requests.send(request).await.is_err() {
            warn!(
                "No operator attached; rejecting fix for {}",
                proposal.category
            );
            return ApprovalDecision::Rejected;
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(true)) => ApprovalDecision::Approved,
            Ok(Ok(false)) => ApprovalDecision::Rejected,
            Ok(Err(_)) => {
                warn!("Operator dropped the approval request");
                ApprovalDecision::Rejected
            }
            Err(_) => {
                warn!(
                    "No operator response within {}s; rejecting fix",
                    self.timeout.as_secs()
                );
                ApprovalDecision::Rejected
            }
        }
    }
}

/// Present proposals on the terminal and read `yes`/`no` from stdin
pub async fn run_console_operator(mut inbox: OperatorInbox, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = inbox.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        println!("\n{}", "=".repeat(60));
        println!("PROPOSED FIX FOR: {}", request.proposal.category);
        println!("TARGET FILE: {}", request.proposal.target.display());
        println!("{}", "=".repeat(60));
        println!("\nANALYSIS:\n{}", request.proposal.analysis);
        println!("\nRISK ASSESSMENT:\n{}", request.proposal.risk_assessment);
        println!("\n{}", describe_change(&request.proposal).await);
        println!("Apply this fix? [yes/no]: ");

        let answer = tokio::select! {
            _ = shutdown.cancelled() => None,
            line = lines.next_line() => line.ok().flatten(),
        };

        let approved = answer
            .map(|a| matches!(a.trim().to_lowercase().as_str(), "y" | "yes"))
            .unwrap_or(false);
        info!("Operator answered {}", if approved { "yes" } else { "no" });
        request.answer(approved);
    }
}

/// Line diff against the current target, or the whole proposed source when
/// the target cannot be read
async fn describe_change(proposal: &RepairProposal) -> String {
    match FsOps::read_file_safe(&proposal.target).await {
        Ok(current) => format!(
            "CHANGES (- current, + proposed):\n{}",
            line_diff(&current, &proposal.fixed_source)
        ),
        Err(e) => {
            warn!("Cannot read {} for diff: {:#}", proposal.target.display(), e);
            format!("PROPOSED SOURCE:\n{}", proposal.fixed_source)
        }
    }
}

/// Longest-common-subsequence diff; unchanged lines are prefixed with two
/// spaces, removed with `- ` and added with `+ `
pub fn line_diff(old: &str, new: &str) -> String {
    let old: Vec<&str> = old.lines().collect();
    let new: Vec<&str> = new.lines().collect();
    let (n, m) = (old.len(), new.len());

    // lcs[i][j] = common lines of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(format!("  {}", old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(format!("- {}", old[i]));
            i += 1;
        } else {
            out.push(format!("+ {}", new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|line| format!("- {}", line)));
    out.extend(new[j..].iter().map(|line| format!("+ {}", line)));
    out.join("\n")
}
