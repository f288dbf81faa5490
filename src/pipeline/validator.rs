// src/pipeline/validator.rs
//! Record validation and the recurring-failure threshold
//!
//! Rules run in order per record: title present, posting not older than a
//! week, industry in the configured targets. The industry check calls out to
//! the completion capability and keeps the record when that call fails.

use chrono::{Duration as ChronoDuration, NaiveDate};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error_tracker::ErrorTracker;
use crate::core::AuditLog;
use crate::llm::Completion;
use crate::types::JobRecord;

const COMPONENT: &str = "Validator";

/// Occurrences of one category that raise the critical flag
pub const CRITICAL_THRESHOLD: u32 = 3;
pub const MAX_AGE_DAYS: i64 = 7;

pub mod categories {
    pub const MISSING_TITLE: &str = "missing_title";
    pub const INDUSTRY_CHECK_FAILED: &str = "industry_check_failed";

    const FETCH_FAILED_PREFIX: &str = "fetch_failed:";

    pub fn fetch_failed(source: &str) -> String {
        format!("{}{}", FETCH_FAILED_PREFIX, source)
    }

    /// Categories a fetcher rewrite can plausibly fix. Classifier outages
    /// are tracked but never trigger repair.
    pub fn is_repairable(category: &str) -> bool {
        category == MISSING_TITLE || category.starts_with(FETCH_FAILED_PREFIX)
    }
}

pub struct Validator {
    classifier: Arc<dyn Completion>,
    tracker: Arc<ErrorTracker>,
    audit: AuditLog,
    classify_timeout: Duration,
    critical: AtomicBool,
}

impl Validator {
    pub fn new(
        classifier: Arc<dyn Completion>,
        tracker: Arc<ErrorTracker>,
        audit: AuditLog,
        classify_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            tracker,
            audit,
            classify_timeout,
            critical: AtomicBool::new(false),
        }
    }

    /// Keep the records that pass every rule, in input order
    pub async fn validate(
        &self,
        records: Vec<JobRecord>,
        target_industries: &[String],
        today: NaiveDate,
    ) -> Vec<JobRecord> {
        let total = records.len();
        let cutoff = today - ChronoDuration::days(MAX_AGE_DAYS);
        let mut accepted = Vec::with_capacity(total);

        for record in records {
            if record.title.trim().is_empty() {
                self.audit
                    .error(
                        COMPONENT,
                        &format!("Invalid job data from {}: missing title", record.source),
                    )
                    .await;
                self.report_failure(
                    categories::MISSING_TITLE,
                    &format!("{}: {}", record.source, record.link),
                )
                .await;
                continue;
            }

            if let Some(posted) = record.posted_date {
                if posted < cutoff {
                    debug!(
                        "Rejecting stale job '{}' posted {} (cutoff {})",
                        record.title, posted, cutoff
                    );
                    continue;
                }
            }

            if !target_industries.is_empty()
                && !self.matches_industry(&record, target_industries).await
            {
                debug!(
                    "Rejecting '{}' at {}: outside target industries",
                    record.title, record.company
                );
                continue;
            }

            accepted.push(record);
        }

        self.audit
            .info(
                COMPONENT,
                &format!("Validated {}/{} jobs.", accepted.len(), total),
            )
            .await;
        accepted
    }

    /// Count a failure against `category`; a repairable category raises the
    /// critical flag once its count reaches [`CRITICAL_THRESHOLD`]
    pub async fn report_failure(&self, category: &str, detail: &str) -> u32 {
        let count = self.tracker.record(category, detail).await;
        if count >= CRITICAL_THRESHOLD
            && categories::is_repairable(category)
            && !self.critical.swap(true, Ordering::SeqCst)
        {
            self.audit
                .critical(
                    COMPONENT,
                    &format!(
                        "Error category '{}' reached {} occurrences.",
                        category, count
                    ),
                )
                .await;
        }
        count
    }

    pub fn critical_error_flag(&self) -> bool {
        self.critical.load(Ordering::SeqCst)
    }

    pub fn clear_critical_flag(&self) {
        self.critical.store(false, Ordering::SeqCst);
    }

    async fn matches_industry(&self, record: &JobRecord, industries: &[String]) -> bool {
        let prompt = industry_prompt(record, industries);
        let response =
            tokio::time::timeout(self.classify_timeout, self.classifier.complete(&prompt)).await;

        let failure = match response {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                return text.to_uppercase().contains("YES");
            }
            Ok(Ok(_)) => "empty classifier response".to_string(),
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!(
                "classifier timed out after {}s",
                self.classify_timeout.as_secs()
            ),
        };

        self.audit
            .error(
                COMPONENT,
                &format!("Industry check failed for '{}': {}", record.title, failure),
            )
            .await;
        self.report_failure(categories::INDUSTRY_CHECK_FAILED, &failure)
            .await;
        true
    }
}

fn industry_prompt(record: &JobRecord, industries: &[String]) -> String {
    format!(
        r#"Analyze if the following job belongs to one of these target industries: {industries}.

Job Title: {title}
Company: {company}

Respond with ONLY "YES" or "NO"."#,
        industries = industries.join(", "),
        title = record.title,
        company = record.company,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Database;
    use crate::testing::{job, MockCompletion};
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 11, 20).unwrap()
    }

    async fn validator(classifier: Arc<MockCompletion>) -> (Validator, Arc<ErrorTracker>) {
        let db = Database::in_memory().await.unwrap();
        let tracker = Arc::new(ErrorTracker::in_memory());
        let validator = Validator::new(
            classifier,
            tracker.clone(),
            AuditLog::new(db.pool().clone()),
            Duration::from_secs(1),
        );
        (validator, tracker)
    }

    #[tokio::test]
    async fn test_rules_apply_in_order() {
        let classifier = Arc::new(
            MockCompletion::new()
                .when("Company: Acme Bank", Ok("YES"))
                .when("Company: Toy Shop", Ok("NO")),
        );
        let (validator, tracker) = validator(classifier.clone()).await;

        let mut untitled = job("", "https://r/0");
        untitled.company = "Acme Bank".to_string();
        let mut stale = job("Old PM", "https://r/1");
        stale.company = "Acme Bank".to_string();
        stale.posted_date = NaiveDate::from_ymd_opt(2025, 11, 12);
        let mut week_old = job("PM", "https://r/2");
        week_old.company = "Acme Bank".to_string();
        week_old.posted_date = NaiveDate::from_ymd_opt(2025, 11, 13);
        let mut toys = job("PM", "https://r/3");
        toys.company = "Toy Shop".to_string();

        let industries = vec!["FinTech".to_string()];
        let accepted = validator
            .validate(vec![untitled, stale, week_old, toys], &industries, today())
            .await;

        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].link, "https://r/2");
        assert_eq!(tracker.count(categories::MISSING_TITLE).await, 1);
        // title and freshness rejections never reach the classifier
        assert_eq!(classifier.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_classifier_failure_keeps_record() {
        let classifier = Arc::new(MockCompletion::new().fail_when("Respond with ONLY", "quota"));
        let (validator, tracker) = validator(classifier).await;

        let industries = vec!["FinTech".to_string()];
        let accepted = validator
            .validate(vec![job("PM", "https://r/1")], &industries, today())
            .await;

        assert_eq!(accepted.len(), 1);
        assert_eq!(tracker.count(categories::INDUSTRY_CHECK_FAILED).await, 1);
    }

    #[tokio::test]
    async fn test_classifier_outage_never_raises_flag() {
        let classifier = Arc::new(MockCompletion::new().fail_when("Respond with ONLY", "quota"));
        let (validator, tracker) = validator(classifier).await;

        let industries = vec!["FinTech".to_string()];
        let records = (0..4)
            .map(|i| job("PM", &format!("https://r/{}", i)))
            .collect();
        let accepted = validator.validate(records, &industries, today()).await;

        assert_eq!(accepted.len(), 4);
        assert_eq!(tracker.count(categories::INDUSTRY_CHECK_FAILED).await, 4);
        assert!(!validator.critical_error_flag());
    }

    #[test]
    fn test_repairable_categories() {
        assert!(categories::is_repairable(categories::MISSING_TITLE));
        assert!(categories::is_repairable(&categories::fetch_failed("reed")));
        assert!(!categories::is_repairable(categories::INDUSTRY_CHECK_FAILED));
    }

    #[tokio::test]
    async fn test_no_target_industries_skips_classifier() {
        let classifier = Arc::new(MockCompletion::new());
        let (validator, _) = validator(classifier.clone()).await;

        let accepted = validator
            .validate(vec![job("PM", "https://r/1")], &[], today())
            .await;

        assert_eq!(accepted.len(), 1);
        assert!(classifier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_critical_flag_raised_at_threshold() {
        let (validator, _) = validator(Arc::new(MockCompletion::new())).await;

        assert_eq!(validator.report_failure("fetch_failed:reed", "boom").await, 1);
        assert_eq!(validator.report_failure("fetch_failed:reed", "boom").await, 2);
        assert!(!validator.critical_error_flag());

        assert_eq!(validator.report_failure("fetch_failed:reed", "boom").await, 3);
        assert!(validator.critical_error_flag());

        validator.clear_critical_flag();
        assert!(!validator.critical_error_flag());
        // counts keep growing until a repair resets them
        validator.report_failure("fetch_failed:reed", "boom").await;
        assert!(validator.critical_error_flag());
    }

    #[tokio::test]
    async fn test_missing_titles_trip_the_flag() {
        let (validator, _) = validator(Arc::new(MockCompletion::new())).await;

        let records = vec![job("", "https://r/1"), job("", "https://r/2")];
        validator.validate(records, &[], today()).await;
        assert!(!validator.critical_error_flag());

        validator
            .validate(vec![job("", "https://r/3")], &[], today())
            .await;
        assert!(validator.critical_error_flag());
    }
}
