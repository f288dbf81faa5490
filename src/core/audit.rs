// src/core/audit.rs
//! Append-only audit trail of pipeline component actions
//!
//! Each entry goes to `tracing` at the matching level and to the `agent_logs`
//! table. Losing an audit row is never allowed to fail the caller.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::types::{AgentLogEntry, Severity};

#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
}

impl AuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, component: &str, severity: Severity, message: &str) {
        match severity {
            Severity::Info | Severity::Success => {
                info!(component, status = %severity, "{}", message)
            }
            Severity::Warning => warn!(component, status = %severity, "{}", message),
            Severity::Error | Severity::Critical => {
                error!(component, status = %severity, "{}", message)
            }
        }

        let result = sqlx::query(
            "INSERT INTO agent_logs (timestamp, agent_name, message, status) VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(component)
        .bind(message)
        .bind(severity.as_str())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!("Failed to write audit entry for {}: {}", component, e);
        }
    }

    pub async fn info(&self, component: &str, message: &str) {
        self.record(component, Severity::Info, message).await
    }

    pub async fn success(&self, component: &str, message: &str) {
        self.record(component, Severity::Success, message).await
    }

    pub async fn warning(&self, component: &str, message: &str) {
        self.record(component, Severity::Warning, message).await
    }

    pub async fn error(&self, component: &str, message: &str) {
        self.record(component, Severity::Error, message).await
    }

    pub async fn critical(&self, component: &str, message: &str) {
        self.record(component, Severity::Critical, message).await
    }

    /// Newest entries first
    pub async fn recent(&self, limit: i64) -> Result<Vec<AgentLogEntry>> {
        let entries = sqlx::query_as::<_, AgentLogEntry>(
            r#"
            SELECT id, timestamp, agent_name, message, status
            FROM agent_logs
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
