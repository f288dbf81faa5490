// src/types/job.rs
//! Canonical job record shapes shared by the intake, pipeline and store layers

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intake::dates::resolve_posted_date;

pub const NOT_AVAILABLE: &str = "N/A";
pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 100;

// ===== Stored Record =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Option<i64>,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub posted_date: Option<NaiveDate>,
    pub posted_date_text: String,
    pub salary: String,
    pub applicants: String,
    pub job_type: String,
    pub source: String,
    pub match_score: i64,
    pub match_reasoning: String,
    pub is_applied: bool,
    pub user_remarks: Option<String>,
    pub user_feedback: Option<String>,
    pub is_external: bool,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Blank record for a link, used for external submissions before enrichment
    pub fn placeholder(link: &str, source: &str) -> Self {
        Self {
            id: None,
            title: "External Job".to_string(),
            company: String::new(),
            location: String::new(),
            link: normalize_link(link),
            posted_date: None,
            posted_date_text: String::new(),
            salary: NOT_AVAILABLE.to_string(),
            applicants: NOT_AVAILABLE.to_string(),
            job_type: NOT_AVAILABLE.to_string(),
            source: source.to_string(),
            match_score: MIN_SCORE,
            match_reasoning: String::new(),
            is_applied: false,
            user_remarks: None,
            user_feedback: None,
            is_external: false,
            created_at: Utc::now(),
        }
    }

    pub fn normalized_link(&self) -> String {
        normalize_link(&self.link)
    }

    pub fn set_score(&mut self, score: i64, reasoning: impl Into<String>) {
        self.match_score = clamp_score(score);
        self.match_reasoning = reasoning.into();
    }
}

/// Dedup identity of a record
pub fn normalize_link(link: &str) -> String {
    link.trim().to_string()
}

pub fn clamp_score(score: i64) -> i64 {
    score.clamp(MIN_SCORE, MAX_SCORE)
}

// ===== Fetch Boundary =====

/// Raw record as emitted by a source fetcher.
///
/// Fetchers are inconsistent about key casing ("Title" vs "title"), so every
/// field accepts both spellings. Nothing downstream ever sees this type; it is
/// converted with [`RawJob::into_record`] as soon as it is parsed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJob {
    #[serde(default, alias = "Title")]
    pub title: Option<String>,
    #[serde(default, alias = "Company")]
    pub company: Option<String>,
    #[serde(default, alias = "Location")]
    pub location: Option<String>,
    #[serde(default, alias = "Link")]
    pub link: Option<String>,
    #[serde(default, alias = "Posted Date")]
    pub posted_date: Option<String>,
    #[serde(default, alias = "Posted Date Text")]
    pub posted_date_text: Option<String>,
    #[serde(default, alias = "Salary")]
    pub salary: Option<String>,
    #[serde(default, alias = "Applicants")]
    pub applicants: Option<String>,
    #[serde(default, alias = "Job Type")]
    pub job_type: Option<String>,
    #[serde(default, alias = "Source")]
    pub source: Option<String>,
}

impl RawJob {
    pub fn into_record(self, fallback_source: &str, now: NaiveDateTime) -> JobRecord {
        let posted_date = resolve_posted_date(
            self.posted_date.as_deref(),
            self.posted_date_text.as_deref(),
            now,
        );

        JobRecord {
            id: None,
            title: text_or_empty(self.title),
            company: text_or_empty(self.company),
            location: text_or_empty(self.location),
            link: self.link.as_deref().map(normalize_link).unwrap_or_default(),
            posted_date,
            posted_date_text: text_or_empty(self.posted_date_text),
            salary: text_or_na(self.salary),
            applicants: text_or_na(self.applicants),
            job_type: text_or_na(self.job_type),
            source: self
                .source
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| fallback_source.to_string()),
            match_score: MIN_SCORE,
            match_reasoning: String::new(),
            is_applied: false,
            user_remarks: None,
            user_feedback: None,
            is_external: false,
            created_at: Utc::now(),
        }
    }
}

fn text_or_empty(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

fn text_or_na(value: Option<String>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => NOT_AVAILABLE.to_string(),
    }
}

// ===== User Interaction =====

/// Partial update of the user-owned fields of a record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub is_applied: Option<bool>,
    pub user_remarks: Option<String>,
    pub user_feedback: Option<String>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        self.is_applied.is_none() && self.user_remarks.is_none() && self.user_feedback.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, 20)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_raw_job_accepts_both_key_casings() {
        let title_case: RawJob = serde_json::from_str(
            r#"{"Title": "Product Owner", "Company": "Acme", "Link": " https://x/1 ", "Job Type": "Contract"}"#,
        )
        .unwrap();
        let lower_case: RawJob = serde_json::from_str(
            r#"{"title": "Product Owner", "company": "Acme", "link": "https://x/1", "job_type": "Contract"}"#,
        )
        .unwrap();

        let a = title_case.into_record("reed", now());
        let b = lower_case.into_record("reed", now());

        assert_eq!(a.title, b.title);
        assert_eq!(a.company, b.company);
        assert_eq!(a.link, "https://x/1");
        assert_eq!(a.link, b.link);
        assert_eq!(a.job_type, "Contract");
    }

    #[test]
    fn test_into_record_defaults() {
        let raw: RawJob = serde_json::from_str(r#"{"title": "PM", "salary": "  "}"#).unwrap();
        let record = raw.into_record("linkedin", now());

        assert_eq!(record.salary, NOT_AVAILABLE);
        assert_eq!(record.applicants, NOT_AVAILABLE);
        assert_eq!(record.source, "linkedin");
        assert_eq!(record.match_score, 0);
        assert!(record.posted_date.is_none());
        assert!(!record.is_external);
    }

    #[test]
    fn test_relative_date_resolved_at_boundary() {
        let raw: RawJob =
            serde_json::from_str(r#"{"title": "PM", "Posted Date Text": "3 days ago"}"#).unwrap();
        let record = raw.into_record("reed", now());
        assert_eq!(record.posted_date, NaiveDate::from_ymd_opt(2025, 11, 17));
        assert_eq!(record.posted_date_text, "3 days ago");
    }

    #[test]
    fn test_set_score_clamps() {
        let mut record = JobRecord::placeholder("https://x", "External");
        record.set_score(140, "too high");
        assert_eq!(record.match_score, 100);
        record.set_score(-3, "too low");
        assert_eq!(record.match_score, 0);
    }
}
