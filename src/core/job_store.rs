// src/core/job_store.rs
//! Record store for job postings, keyed by link

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::types::job::{clamp_score, normalize_link};
use crate::types::{JobRecord, JobUpdate};

const JOB_COLUMNS: &str = r#"
    id, title, company, location, link, posted_date, posted_date_text, salary,
    applicants, job_type, source, match_score, match_reasoning, is_applied,
    user_remarks, user_feedback, is_external, created_at
"#;

const INSERT_JOB: &str = r#"
    INSERT INTO job_posts (
        title, company, location, link, posted_date, posted_date_text, salary,
        applicants, job_type, source, match_score, match_reasoning, is_applied,
        user_remarks, user_feedback, is_external, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(link) DO NOTHING
"#;

/// Result of an all-or-nothing batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchInsert {
    pub inserted: usize,
    /// Rows whose link already existed at commit time
    pub skipped: usize,
}

pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Every stored link, normalized
    pub async fn list_links(&self) -> Result<HashSet<String>> {
        let links: Vec<String> = sqlx::query_scalar("SELECT link FROM job_posts")
            .fetch_all(self.pool)
            .await
            .context("Failed to load stored links")?;

        Ok(links.iter().map(|l| normalize_link(l)).collect())
    }

    /// Insert a batch inside one transaction.
    ///
    /// A link that already exists is skipped and counted without failing the
    /// batch; any other error rolls the whole batch back.
    pub async fn insert_batch(&self, records: &[JobRecord]) -> Result<BatchInsert> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open insert transaction")?;
        let mut outcome = BatchInsert::default();

        for record in records {
            let result = bind_record(sqlx::query(INSERT_JOB), record)
                .execute(&mut *tx)
                .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => {
                    warn!("Skipping duplicate link at insert: {}", record.link);
                    outcome.skipped += 1;
                }
                Ok(_) => outcome.inserted += 1,
                Err(e) => {
                    tx.rollback()
                        .await
                        .context("Failed to roll back insert transaction")?;
                    return Err(e).with_context(|| {
                        format!("Failed to insert job {}; batch rolled back", record.link)
                    });
                }
            }
        }

        tx.commit()
            .await
            .context("Failed to commit insert transaction")?;

        info!(
            "Inserted {} jobs ({} duplicates skipped)",
            outcome.inserted, outcome.skipped
        );
        Ok(outcome)
    }

    /// Insert a single record, returning its id or `None` if the link exists
    pub async fn insert_one(&self, record: &JobRecord) -> Result<Option<i64>> {
        let result = bind_record(sqlx::query(INSERT_JOB), record)
            .execute(self.pool)
            .await
            .with_context(|| format!("Failed to insert job {}", record.link))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {} FROM job_posts WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(job)
    }

    pub async fn find_by_link(&self, link: &str) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {} FROM job_posts WHERE link = ?",
            JOB_COLUMNS
        ))
        .bind(normalize_link(link))
        .fetch_optional(self.pool)
        .await?;

        Ok(job)
    }

    /// All jobs, best match first, then most recently posted
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {} FROM job_posts ORDER BY match_score DESC, posted_date DESC, id ASC",
            JOB_COLUMNS
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(jobs)
    }

    /// Jobs the user has commented on; input for profile rebuilds
    pub async fn jobs_with_feedback(&self) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {} FROM job_posts WHERE user_feedback IS NOT NULL AND TRIM(user_feedback) != '' ORDER BY id ASC",
            JOB_COLUMNS
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(jobs)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_posts")
            .fetch_one(self.pool)
            .await?;
        Ok(count)
    }

    /// Apply the user-owned fields that are set; returns false if no such job
    pub async fn update_job(&self, id: i64, update: &JobUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_posts
            SET is_applied = COALESCE(?, is_applied),
                user_remarks = COALESCE(?, user_remarks),
                user_feedback = COALESCE(?, user_feedback)
            WHERE id = ?
            "#,
        )
        .bind(update.is_applied)
        .bind(update.user_remarks.as_deref())
        .bind(update.user_feedback.as_deref())
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the evaluated fields of an externally submitted job
    pub async fn update_evaluation(
        &self,
        id: i64,
        title: &str,
        company: &str,
        score: i64,
        reasoning: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_posts
            SET title = ?, company = ?, match_score = ?, match_reasoning = ?
            WHERE id = ?
            "#,
        )
        .bind(title)
        .bind(company)
        .bind(clamp_score(score))
        .bind(reasoning)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_reasoning(&self, id: i64, reasoning: &str) -> Result<()> {
        sqlx::query("UPDATE job_posts SET match_reasoning = ? WHERE id = ?")
            .bind(reasoning)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_jobs(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM job_posts WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(self.pool).await?;
        info!("Deleted {} jobs", result.rows_affected());
        Ok(result.rows_affected())
    }
}

fn bind_record<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    record: &'q JobRecord,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(record.title.as_str())
        .bind(record.company.as_str())
        .bind(record.location.as_str())
        .bind(record.link.trim())
        .bind(record.posted_date)
        .bind(record.posted_date_text.as_str())
        .bind(record.salary.as_str())
        .bind(record.applicants.as_str())
        .bind(record.job_type.as_str())
        .bind(record.source.as_str())
        .bind(record.match_score)
        .bind(record.match_reasoning.as_str())
        .bind(record.is_applied)
        .bind(record.user_remarks.as_deref())
        .bind(record.user_feedback.as_deref())
        .bind(record.is_external)
        .bind(Utc::now())
}
