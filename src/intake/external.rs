// src/intake/external.rs
//! Operator-submitted job links: store a placeholder, read the page, score it

use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::core::{AuditLog, Database, JobRepository};
use crate::llm::{parse_payload, Completion};
use crate::pipeline::ProfileStore;
use crate::types::JobRecord;

const COMPONENT: &str = "ExternalProcessor";
pub const EXTERNAL_SOURCE: &str = "External";
const MAX_PAGE_CHARS: usize = 10_000;
const EVALUATION_UNAVAILABLE: &str = "Evaluation unavailable.";

/// Readable text pulled from a job page
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub title: Option<String>,
    pub company: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ExternalVerdict {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    match_score: Option<f64>,
    #[serde(default)]
    match_reasoning: Option<String>,
}

pub struct ExternalProcessor {
    client: Client,
    llm: Arc<dyn Completion>,
    profiles: Arc<ProfileStore>,
    database: Database,
    audit: AuditLog,
    llm_timeout: Duration,
}

impl ExternalProcessor {
    pub fn new(
        llm: Arc<dyn Completion>,
        profiles: Arc<ProfileStore>,
        database: Database,
        http_timeout: Duration,
        llm_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .timeout(http_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let audit = AuditLog::new(database.pool().clone());

        Ok(Self {
            client,
            llm,
            profiles,
            database,
            audit,
            llm_timeout,
        })
    }

    /// Register `url` and evaluate it. A link that is already stored is
    /// returned unchanged.
    pub async fn submit(&self, url: &str) -> Result<JobRecord> {
        let (job, created) = self.register(url).await?;
        if !created {
            info!("Link already stored as job {:?}", job.id);
            return Ok(job);
        }

        let content = match self.fetch_page(&job.link).await {
            Ok(content) => content,
            Err(e) => {
                self.audit
                    .error(COMPONENT, &format!("Failed to scrape {}: {:#}", job.link, e))
                    .await;
                return self
                    .finish_with_reasoning(job, "Failed to scrape content from URL.")
                    .await;
            }
        };

        self.evaluate(job, &content).await
    }

    /// Store a placeholder record for `url`; `false` when the link existed
    pub async fn register(&self, url: &str) -> Result<(JobRecord, bool)> {
        let repo = JobRepository::new(self.database.pool());
        let mut job = JobRecord::placeholder(url, EXTERNAL_SOURCE);
        if job.link.is_empty() {
            anyhow::bail!("Cannot submit an empty link");
        }

        if let Some(existing) = repo.find_by_link(&job.link).await? {
            return Ok((existing, false));
        }

        job.is_external = true;
        match repo.insert_one(&job).await? {
            Some(id) => {
                job.id = Some(id);
                self.audit
                    .info(COMPONENT, &format!("Registered external job {}: {}", id, job.link))
                    .await;
                Ok((job, true))
            }
            // lost a race with a cycle that stored the same link
            None => {
                let existing = repo
                    .find_by_link(&job.link)
                    .await?
                    .context("Link vanished after conflicting insert")?;
                Ok((existing, false))
            }
        }
    }

    pub async fn fetch_page(&self, url: &str) -> Result<PageContent> {
        info!("Fetching job page: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to fetch job page")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        let html = response
            .text()
            .await
            .context("Failed to read response body")?;

        extract_page(&html).context("No readable content on page")
    }

    /// Score the page against the current profile and store the result
    pub async fn evaluate(&self, mut job: JobRecord, content: &PageContent) -> Result<JobRecord> {
        let Some(profile) = self.profiles.current() else {
            return self
                .finish_with_reasoning(job, "No relevance profile available; not scored.")
                .await;
        };

        let prompt = external_prompt(&profile.to_prompt_json(), content);
        let response = tokio::time::timeout(self.llm_timeout, self.llm.complete(&prompt)).await;

        let verdict = match response {
            Ok(Ok(text)) => parse_payload::<ExternalVerdict>(&text),
            Ok(Err(e)) => {
                self.audit
                    .error(COMPONENT, &format!("No response from LLM: {:#}", e))
                    .await;
                return self.finish_with_reasoning(job, EVALUATION_UNAVAILABLE).await;
            }
            Err(_) => {
                self.audit
                    .error(COMPONENT, "Evaluation timed out.")
                    .await;
                return self.finish_with_reasoning(job, EVALUATION_UNAVAILABLE).await;
            }
        };

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("Unparsable external evaluation: {}", e);
                return self
                    .finish_with_reasoning(job, "Error parsing evaluation results.")
                    .await;
            }
        };

        if let Some(title) = verdict.title.or_else(|| content.title.clone()) {
            job.title = title;
        }
        if let Some(company) = verdict.company.or_else(|| content.company.clone()) {
            job.company = company;
        }
        job.set_score(
            verdict.match_score.unwrap_or(0.0).round() as i64,
            verdict
                .match_reasoning
                .unwrap_or_else(|| "Evaluated by AI".to_string()),
        );

        if let Some(id) = job.id {
            JobRepository::new(self.database.pool())
                .update_evaluation(id, &job.title, &job.company, job.match_score, &job.match_reasoning)
                .await?;
        }

        self.audit
            .success(
                COMPONENT,
                &format!("Evaluation complete. Score: {}", job.match_score),
            )
            .await;
        Ok(job)
    }

    async fn finish_with_reasoning(&self, mut job: JobRecord, reasoning: &str) -> Result<JobRecord> {
        if let Some(id) = job.id {
            JobRepository::new(self.database.pool())
                .set_reasoning(id, reasoning)
                .await?;
        }
        job.match_reasoning = reasoning.to_string();
        Ok(job)
    }
}

// ===== Page Extraction =====

/// Pull title, company and body text out of a job page
pub fn extract_page(html: &str) -> Option<PageContent> {
    let document = Html::parse_document(html);

    let title = find_text_by_selectors(
        &document,
        &[
            "h1.top-card-layout__title",
            ".job-details-jobs-unified-top-card__job-title",
            "h1",
            "[class*='job-title']",
            "title",
        ],
    );
    let company = find_text_by_selectors(
        &document,
        &[
            ".job-details-jobs-unified-top-card__company-name",
            "[class*='company']",
            "[class*='employer']",
        ],
    );
    let text = find_text_by_selectors(
        &document,
        &[
            ".jobs-description__container",
            "[class*='description']",
            "main",
            "article",
            "body",
        ],
    )?;

    Some(PageContent {
        title,
        company,
        text,
    })
}

fn find_text_by_selectors(document: &Html, selectors: &[&str]) -> Option<String> {
    for selector_str in selectors {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let text = clean_text(&element.text().collect::<Vec<_>>().join(" "));
                if text.len() > 5 {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn external_prompt(profile: &str, content: &PageContent) -> String {
    let text: String = content.text.chars().take(MAX_PAGE_CHARS).collect();
    format!(
        r#"You are a Career Agent evaluating a job posting against a user's success persona.

User Persona:
{profile}

Job Posting Content:
{text}

Task:
1. Extract the Job Title and Company Name if possible.
2. Evaluate the match score (0-100).
3. Provide a concise reasoning.

Output JSON:
{{
    "title": "Extracted Title",
    "company": "Extracted Company",
    "match_score": 85,
    "match_reasoning": "Reasoning here..."
}}"#,
        profile = profile,
        text = text,
    )
}
