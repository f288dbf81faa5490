// src/pipeline/evaluator.rs
//! Batch relevance scoring against the current profile

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::profile::ProfileStore;
use crate::core::AuditLog;
use crate::llm::{parse_payload, Completion};
use crate::types::{JobRecord, RelevanceProfile};

const COMPONENT: &str = "Evaluator";

pub const BATCH_SIZE: usize = 5;
pub const FALLBACK_SCORE: i64 = 50;
pub const FALLBACK_REASONING: &str = "Error evaluating job.";

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default, alias = "job_number")]
    index: Option<u32>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

pub struct Evaluator {
    scorer: Arc<dyn Completion>,
    profiles: Arc<ProfileStore>,
    audit: AuditLog,
    timeout: Duration,
    concurrency: usize,
}

impl Evaluator {
    pub fn new(
        scorer: Arc<dyn Completion>,
        profiles: Arc<ProfileStore>,
        audit: AuditLog,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            scorer,
            profiles,
            audit,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Score every record and return them ordered by score, highest first.
    ///
    /// Without a profile the records come back unscored and in input order.
    pub async fn score_jobs(&self, jobs: Vec<JobRecord>) -> Vec<JobRecord> {
        if jobs.is_empty() {
            return jobs;
        }

        let Some(profile) = self.profiles.current() else {
            self.audit
                .warning(
                    COMPONENT,
                    "No relevance profile available; skipping evaluation.",
                )
                .await;
            return jobs;
        };

        let total = jobs.len();
        let batches: Vec<Vec<JobRecord>> = jobs.chunks(BATCH_SIZE).map(<[_]>::to_vec).collect();
        self.audit
            .info(
                COMPONENT,
                &format!("Evaluating {} jobs in {} batches.", total, batches.len()),
            )
            .await;

        let profile = profile.as_ref();
        let mut scored: Vec<JobRecord> = stream::iter(batches)
            .map(|batch| self.evaluate_batch(profile, batch))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        // stable: equal scores keep fetch order
        scored.sort_by(|a, b| b.match_score.cmp(&a.match_score));

        if let Some(top) = scored.first() {
            self.audit
                .success(
                    COMPONENT,
                    &format!(
                        "Evaluation complete. Highest score: {} ({})",
                        top.match_score, top.title
                    ),
                )
                .await;
        }
        scored
    }

    /// Score one batch; any failure gives every record in it the fallback
    pub async fn evaluate_batch(
        &self,
        profile: &RelevanceProfile,
        mut batch: Vec<JobRecord>,
    ) -> Vec<JobRecord> {
        let prompt = batch_prompt(profile, &batch);
        let response = tokio::time::timeout(self.timeout, self.scorer.complete(&prompt)).await;

        let verdicts = match response {
            Ok(Ok(text)) => match parse_payload::<Vec<Verdict>>(&text) {
                Ok(verdicts) => verdicts,
                Err(e) => {
                    warn!("Unparsable scoring response: {}", e);
                    return apply_fallback(batch);
                }
            },
            Ok(Err(e)) => {
                self.audit
                    .error(COMPONENT, &format!("Error evaluating batch: {:#}", e))
                    .await;
                return apply_fallback(batch);
            }
            Err(_) => {
                self.audit
                    .error(
                        COMPONENT,
                        &format!(
                            "Scoring timed out after {}s; using fallback scores.",
                            self.timeout.as_secs()
                        ),
                    )
                    .await;
                return apply_fallback(batch);
            }
        };

        if verdicts.len() != batch.len() {
            warn!(
                "Scoring returned {} verdicts for {} jobs",
                verdicts.len(),
                batch.len()
            );
        }

        for (position, job) in batch.iter_mut().enumerate() {
            match verdicts.get(position) {
                Some(verdict) => {
                    if let Some(index) = verdict.index {
                        if index as usize != position + 1 {
                            debug!("Verdict numbered {} at position {}", index, position + 1);
                        }
                    }
                    let score = verdict.score.unwrap_or(0.0).round() as i64;
                    let reasoning = verdict
                        .reasoning
                        .clone()
                        .unwrap_or_else(|| "No reasoning provided.".to_string());
                    job.set_score(score, reasoning);
                }
                None => job.set_score(FALLBACK_SCORE, FALLBACK_REASONING),
            }
        }

        batch
    }
}

fn apply_fallback(mut batch: Vec<JobRecord>) -> Vec<JobRecord> {
    for job in &mut batch {
        job.set_score(FALLBACK_SCORE, FALLBACK_REASONING);
    }
    batch
}

fn batch_prompt(profile: &RelevanceProfile, batch: &[JobRecord]) -> String {
    let jobs_text: String = batch
        .iter()
        .enumerate()
        .map(|(i, job)| {
            format!(
                "\nJob {}:\nTitle: {}\nCompany: {}\nLocation: {}\nSalary: {}\nType: {}\nLink: {}\n",
                i + 1,
                job.title,
                job.company,
                job.location,
                job.salary,
                job.job_type,
                job.link
            )
        })
        .collect();

    format!(
        r#"You are an expert recruiter. Evaluate the following jobs against the candidate's Success Persona.

Success Persona:
{profile}

Jobs to Evaluate:
{jobs}

For EACH job, provide a match score (0-100) and a brief reasoning.
Return ONLY a JSON array of objects, one per job, in the same order:
[
    {{
        "job_number": 1,
        "score": 85,
        "reasoning": "..."
    }},
    ...
]"#,
        profile = profile.to_prompt_json(),
        jobs = jobs_text,
    )
}
