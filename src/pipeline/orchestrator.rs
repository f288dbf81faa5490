// src/pipeline/orchestrator.rs
//! Drives one intake cycle: fetch, validate, deduplicate, score, persist
//!
//! A cycle never returns an error to its caller. Stage failures are audited
//! and surface as a [`CycleOutcome`]; the next scheduled cycle starts fresh.

use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::approval::ApprovalGate;
use super::corrector::{RepairOutcome, RepairState, SelfCorrector};
use super::error_tracker::ErrorTracker;
use super::evaluator::Evaluator;
use super::profile::ProfileStore;
use super::schedule::{Clock, ScheduleConfig};
use super::validator::{categories, Validator};
use crate::core::settings::keys;
use crate::core::{AuditLog, BatchInsert, Database, JobRepository, SettingsRepository};
use crate::environment::EnvironmentConfig;
use crate::errors::CycleError;
use crate::intake::SourceFetcher;
use crate::llm::Completion;
use crate::types::{JobRecord, RelevanceProfile};

const COMPONENT: &str = "Orchestrator";
const DEFAULT_KEYWORD: &str = "Technical Project Manager";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Idle,
    Running,
    Repairing,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Another cycle held the guard; nothing ran
    Busy,
    NoRecords,
    NothingValid,
    AllSeen,
    Persisted(BatchInsert),
    RepairTriggered(RepairOutcome),
    Failed(CycleError),
}

// ===== Wiring =====

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_timeout: Duration,
    pub classify_timeout: Duration,
    pub scoring_timeout: Duration,
    pub repair_timeout: Duration,
    pub profile_timeout: Duration,
    pub polite_delay: Duration,
    pub fetch_limit: Option<usize>,
    pub scoring_concurrency: usize,
    pub fetcher_source: PathBuf,
    pub repair_model: Option<String>,
    pub documents_dir: PathBuf,
    pub schedule: ScheduleConfig,
}

impl PipelineSettings {
    pub fn from_environment(env: &EnvironmentConfig) -> Result<Self> {
        Ok(Self {
            fetch_timeout: env.timeouts.fetch(),
            classify_timeout: env.timeouts.classify(),
            scoring_timeout: env.timeouts.scoring(),
            repair_timeout: env.timeouts.repair(),
            profile_timeout: env.timeouts.profile(),
            polite_delay: Duration::from_millis(env.fetcher.polite_delay_ms),
            fetch_limit: env.fetcher.limit,
            scoring_concurrency: env.scoring.concurrency,
            fetcher_source: env.fetcher.script.clone(),
            repair_model: env.llm.repair_model.clone(),
            documents_dir: env.documents_dir.clone(),
            schedule: ScheduleConfig {
                window: env.schedule.window()?,
                tick: env.schedule.tick(),
                ..ScheduleConfig::default()
            },
        })
    }
}

/// Capabilities the orchestrator is built from
pub struct PipelineDeps {
    pub database: Database,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub llm: Arc<dyn Completion>,
    pub approval: Arc<dyn ApprovalGate>,
    pub tracker: Arc<ErrorTracker>,
    pub profiles: Arc<ProfileStore>,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    database: Database,
    audit: AuditLog,
    fetcher: Arc<dyn SourceFetcher>,
    llm: Arc<dyn Completion>,
    validator: Validator,
    evaluator: Evaluator,
    corrector: SelfCorrector,
    profiles: Arc<ProfileStore>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    cycle_guard: Mutex<()>,
    status: watch::Sender<PipelineStatus>,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        let audit = AuditLog::new(deps.database.pool().clone());

        let validator = Validator::new(
            deps.llm.clone(),
            deps.tracker.clone(),
            audit.clone(),
            settings.classify_timeout,
        );
        let evaluator = Evaluator::new(
            deps.llm.clone(),
            deps.profiles.clone(),
            audit.clone(),
            settings.scoring_timeout,
            settings.scoring_concurrency,
        );
        let corrector = SelfCorrector::new(
            deps.llm.clone(),
            deps.approval,
            deps.tracker,
            audit.clone(),
            settings.fetcher_source.clone(),
            settings.repair_model.clone(),
            settings.repair_timeout,
        );
        let (status, _) = watch::channel(PipelineStatus::Idle);

        Self {
            database: deps.database,
            audit,
            fetcher: deps.fetcher,
            llm: deps.llm,
            validator,
            evaluator,
            corrector,
            profiles: deps.profiles,
            clock: deps.clock,
            settings,
            cycle_guard: Mutex::new(()),
            status,
        }
    }

    /// Seed configuration defaults and make sure a profile exists
    pub async fn initialize(&self) -> Result<()> {
        SettingsRepository::new(self.database.pool())
            .seed_defaults()
            .await?;

        if self.profiles.current().is_none() {
            self.audit
                .info(COMPONENT, "No relevance profile found; building one.")
                .await;
            if let Err(e) = self.rebuild_profile().await {
                self.audit
                    .error(
                        COMPONENT,
                        &format!("Profile build failed, scoring disabled: {:#}", e),
                    )
                    .await;
            }
        }

        self.audit.info(COMPONENT, "Pipeline initialized.").await;
        Ok(())
    }

    /// Rebuild the relevance profile from documents and stored feedback
    pub async fn rebuild_profile(&self) -> Result<Arc<RelevanceProfile>> {
        let feedback = JobRepository::new(self.database.pool())
            .jobs_with_feedback()
            .await?;
        let profile = self
            .profiles
            .rebuild(
                self.llm.as_ref(),
                &self.settings.documents_dir,
                &feedback,
                self.settings.profile_timeout,
            )
            .await?;
        self.audit
            .success(
                COMPONENT,
                &format!(
                    "Relevance profile rebuilt ({} feedback entries).",
                    feedback.len()
                ),
            )
            .await;
        Ok(profile)
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub fn repair_state(&self) -> RepairState {
        self.corrector.state()
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn database(&self) -> &Database {
        &self.database
    }

    pub(crate) fn schedule_config(&self) -> ScheduleConfig {
        self.settings.schedule
    }

    // ===== Cycle =====

    /// Run one cycle unless one is already in flight
    pub async fn run_cycle(&self) -> CycleOutcome {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            self.audit
                .warning(COMPONENT, "Cycle already in progress; skipping.")
                .await;
            return CycleOutcome::Busy;
        };

        let cycle_id = Uuid::new_v4();
        let outcome = self
            .execute_cycle()
            .instrument(info_span!("cycle", %cycle_id))
            .await;

        let status = match outcome {
            CycleOutcome::Failed(_) => PipelineStatus::Error,
            _ => PipelineStatus::Idle,
        };
        self.status.send_replace(status);
        outcome
    }

    async fn execute_cycle(&self) -> CycleOutcome {
        self.status.send_replace(PipelineStatus::Running);
        self.audit
            .info(
                COMPONENT,
                &format!("Starting cycle at {}", self.clock.now().format("%Y-%m-%d %H:%M:%S")),
            )
            .await;
        self.validator.clear_critical_flag();

        let records = match self.fetch_all().await {
            Ok(records) => records,
            Err(e) => {
                self.audit.error(COMPONENT, &e.to_string()).await;
                if self.validator.critical_error_flag() {
                    return self.hand_to_corrector().await;
                }
                return CycleOutcome::Failed(e);
            }
        };

        if records.is_empty() {
            self.audit.info(COMPONENT, "No jobs found this cycle.").await;
            if self.validator.critical_error_flag() {
                return self.hand_to_corrector().await;
            }
            return CycleOutcome::NoRecords;
        }

        let industries = match SettingsRepository::new(self.database.pool())
            .get_list(keys::TARGET_INDUSTRIES)
            .await
        {
            Ok(industries) => industries,
            Err(e) => {
                let e = CycleError::configuration(&e);
                self.audit.error(COMPONENT, &e.to_string()).await;
                return CycleOutcome::Failed(e);
            }
        };

        let today = self.clock.now().date();
        let valid = self.validator.validate(records, &industries, today).await;

        if self.validator.critical_error_flag() {
            return self.hand_to_corrector().await;
        }
        if valid.is_empty() {
            self.audit.info(COMPONENT, "No valid jobs this cycle.").await;
            return CycleOutcome::NothingValid;
        }

        let fresh = match self.deduplicate(valid).await {
            Ok(fresh) => fresh,
            Err(e) => {
                let e = CycleError::persistence(&e);
                self.audit.error(COMPONENT, &e.to_string()).await;
                return CycleOutcome::Failed(e);
            }
        };
        if fresh.is_empty() {
            self.audit
                .info(COMPONENT, "No new jobs after deduplication.")
                .await;
            return CycleOutcome::AllSeen;
        }

        let scored = self.evaluator.score_jobs(fresh).await;

        match self.persist(&scored).await {
            Ok(batch) => {
                self.audit
                    .success(
                        COMPONENT,
                        &format!("{} new leads saved to database.", batch.inserted),
                    )
                    .await;
                CycleOutcome::Persisted(batch)
            }
            Err(e) => {
                let e = CycleError::persistence(&e);
                self.audit.error(COMPONENT, &e.to_string()).await;
                CycleOutcome::Failed(e)
            }
        }
    }

    async fn hand_to_corrector(&self) -> CycleOutcome {
        self.status.send_replace(PipelineStatus::Repairing);
        self.audit
            .critical(
                COMPONENT,
                "Critical error detected! Handing over to Self-Corrector.",
            )
            .await;
        CycleOutcome::RepairTriggered(self.corrector.attempt_repair().await)
    }

    /// Every keyword against every enabled source.
    ///
    /// A failing source is recorded as `fetch_failed:<source>` and skipped;
    /// the stage only fails when no call succeeds at all.
    async fn fetch_all(&self) -> Result<Vec<JobRecord>, CycleError> {
        let settings = SettingsRepository::new(self.database.pool());
        let mut keywords = settings
            .get_list(keys::KEYWORDS)
            .await
            .map_err(|e| CycleError::configuration(&e))?;
        let sources = settings
            .get_list(keys::ENABLED_SOURCES)
            .await
            .map_err(|e| CycleError::configuration(&e))?;

        if keywords.is_empty() {
            warn!("No keywords configured, using '{}'", DEFAULT_KEYWORD);
            keywords.push(DEFAULT_KEYWORD.to_string());
        }
        if sources.is_empty() {
            self.audit.warning(COMPONENT, "No sources enabled.").await;
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut records = Vec::new();
        let mut attempts = 0usize;
        let mut failures = 0usize;

        for (i, keyword) in keywords.iter().enumerate() {
            if i > 0 && !self.settings.polite_delay.is_zero() {
                tokio::time::sleep(self.settings.polite_delay).await;
            }

            for source in &sources {
                attempts += 1;
                let fetched = tokio::time::timeout(
                    self.settings.fetch_timeout,
                    self.fetcher.fetch(keyword, source, self.settings.fetch_limit),
                )
                .await;

                let failure = match fetched {
                    Ok(Ok(raw)) => {
                        info!("{} postings for '{}' from {}", raw.len(), keyword, source);
                        records.extend(raw.into_iter().map(|r| r.into_record(source, now)));
                        continue;
                    }
                    Ok(Err(e)) => format!("{:#}", e),
                    Err(_) => format!(
                        "timed out after {}s",
                        self.settings.fetch_timeout.as_secs()
                    ),
                };

                failures += 1;
                self.audit
                    .error(
                        COMPONENT,
                        &format!("Fetch of '{}' from {} failed: {}", keyword, source, failure),
                    )
                    .await;
                self.validator
                    .report_failure(
                        &categories::fetch_failed(source),
                        &format!("{}: {}", keyword, failure),
                    )
                    .await;
            }
        }

        if failures == attempts {
            return Err(CycleError::fetch(format!(
                "all {} source calls failed",
                attempts
            )));
        }

        self.audit
            .info(
                COMPONENT,
                &format!("Found {} jobs across {} sources.", records.len(), sources.len()),
            )
            .await;
        Ok(records)
    }

    /// Drop records whose link is empty, already stored, or repeated earlier
    /// in the batch. Survivors keep their order.
    pub async fn deduplicate(&self, records: Vec<JobRecord>) -> Result<Vec<JobRecord>> {
        let mut seen: HashSet<String> = JobRepository::new(self.database.pool())
            .list_links()
            .await?;
        let total = records.len();

        let fresh: Vec<JobRecord> = records
            .into_iter()
            .filter_map(|mut record| {
                let link = record.normalized_link();
                if link.is_empty() {
                    debug!("Dropping '{}' without a link", record.title);
                    return None;
                }
                if !seen.insert(link.clone()) {
                    return None;
                }
                record.link = link;
                Some(record)
            })
            .collect();

        info!("{} of {} jobs are new", fresh.len(), total);
        Ok(fresh)
    }

    pub async fn persist(&self, records: &[JobRecord]) -> Result<BatchInsert> {
        JobRepository::new(self.database.pool())
            .insert_batch(records)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::approval::ApprovalDecision;
    use crate::testing::{job, profile, raw, TestPipeline, ORIGINAL_FETCHER_SOURCE};

    #[tokio::test]
    async fn test_full_cycle_persists_scored_jobs() {
        let pipeline = TestPipeline::builder()
            .profile(profile())
            .industries(&["FinTech"])
            .source(
                "reed",
                Ok(vec![raw("PM", "https://r/1"), raw("Lead", " https://r/2 ")]),
            )
            .respond("Respond with ONLY", Ok("YES"))
            .respond(
                "Jobs to Evaluate",
                Ok(r#"[{"score": 40, "reasoning": "ok"}, {"score": 90, "reasoning": "great"}]"#),
            )
            .build()
            .await;

        let outcome = pipeline.orchestrator.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Persisted(BatchInsert {
                inserted: 2,
                skipped: 0
            })
        );
        assert_eq!(pipeline.orchestrator.status(), PipelineStatus::Idle);

        let stored = pipeline.jobs().await;
        assert_eq!(stored[0].title, "Lead");
        assert_eq!(stored[0].link, "https://r/2");
        assert_eq!(stored[0].match_score, 90);
    }

    #[tokio::test]
    async fn test_second_cycle_sees_everything() {
        let pipeline = TestPipeline::builder()
            .source("reed", Ok(vec![raw("PM", "https://r/1")]))
            .build()
            .await;

        assert!(matches!(
            pipeline.orchestrator.run_cycle().await,
            CycleOutcome::Persisted(_)
        ));
        assert_eq!(
            pipeline.orchestrator.run_cycle().await,
            CycleOutcome::AllSeen
        );
        assert_eq!(pipeline.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deduplicate_against_store_and_batch() {
        let pipeline = TestPipeline::builder().build().await;
        let orchestrator = &pipeline.orchestrator;

        let input = vec![
            job("A", "https://r/1"),
            job("A again", " https://r/1"),
            job("No link", "   "),
            job("B", "https://r/2"),
        ];

        let first = orchestrator.deduplicate(input.clone()).await.unwrap();
        let links: Vec<&str> = first.iter().map(|j| j.link.as_str()).collect();
        assert_eq!(links, vec!["https://r/1", "https://r/2"]);

        // unchanged store: same answer
        assert_eq!(orchestrator.deduplicate(input.clone()).await.unwrap(), first);

        orchestrator.persist(&first).await.unwrap();
        assert!(orchestrator.deduplicate(input).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_source_is_skipped() {
        let pipeline = TestPipeline::builder()
            .source("indeed", Err("selector not found"))
            .source("reed", Ok(vec![raw("PM", "https://r/1")]))
            .build()
            .await;

        let outcome = pipeline.orchestrator.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Persisted(b) if b.inserted == 1));
        assert_eq!(pipeline.tracker.count("fetch_failed:indeed").await, 1);
    }

    #[tokio::test]
    async fn test_all_sources_failing_fails_cycle() {
        let pipeline = TestPipeline::builder()
            .source("reed", Err("connection refused"))
            .build()
            .await;

        let outcome = pipeline.orchestrator.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Failed(CycleError::Fetch(_))));
        assert_eq!(pipeline.orchestrator.status(), PipelineStatus::Error);
        assert!(pipeline.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_two_bad_cycles_do_not_trigger_repair() {
        let pipeline = TestPipeline::builder()
            .source("reed", Ok(vec![raw("", "https://r/1")]))
            .build()
            .await;

        for _ in 0..2 {
            assert_eq!(
                pipeline.orchestrator.run_cycle().await,
                CycleOutcome::NothingValid
            );
        }
        assert_eq!(pipeline.approval.reviews(), 0);
    }

    #[tokio::test]
    async fn test_third_failure_hands_over_to_corrector() {
        let fix = format!("# fixed scraper\n{}", "print('title')\n".repeat(10));
        let proposal = serde_json::json!({
            "analysis": "title selector changed",
            "risk_assessment": "low",
            "fixed_code": fix,
        })
        .to_string();
        let pipeline = TestPipeline::builder()
            .source("reed", Ok(vec![raw("", "https://r/1")]))
            .respond("scraper source", Ok(proposal.as_str()))
            .approval(ApprovalDecision::Approved)
            .build()
            .await;

        pipeline.orchestrator.run_cycle().await;
        pipeline.orchestrator.run_cycle().await;
        let outcome = pipeline.orchestrator.run_cycle().await;

        assert!(matches!(
            outcome,
            CycleOutcome::RepairTriggered(RepairOutcome::Applied { .. })
        ));
        assert_eq!(pipeline.approval.reviews(), 1);
        assert_eq!(pipeline.tracker.count("missing_title").await, 0);
        assert_eq!(pipeline.fetcher_source().await, fix);
        assert_eq!(pipeline.orchestrator.repair_state(), RepairState::Idle);
        assert!(pipeline.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_classifier_outage_keeps_persisting() {
        let pipeline = TestPipeline::builder()
            .source(
                "reed",
                Ok(vec![
                    raw("PM", "https://r/1"),
                    raw("PMO Lead", "https://r/2"),
                    raw("Delivery Manager", "https://r/3"),
                ]),
            )
            .industries(&["FinTech"])
            .respond("Respond with ONLY", Err("quota exceeded"))
            .approval(ApprovalDecision::Approved)
            .build()
            .await;

        let first = pipeline.orchestrator.run_cycle().await;
        assert!(matches!(first, CycleOutcome::Persisted(b) if b.inserted == 3));
        for _ in 0..2 {
            assert_eq!(pipeline.orchestrator.run_cycle().await, CycleOutcome::AllSeen);
        }

        assert_eq!(pipeline.tracker.count("industry_check_failed").await, 9);
        assert_eq!(pipeline.approval.reviews(), 0);
        assert_eq!(pipeline.jobs().await.len(), 3);
        assert_eq!(pipeline.fetcher_source().await, ORIGINAL_FETCHER_SOURCE);
    }

    #[tokio::test]
    async fn test_concurrent_cycle_is_refused() {
        let pipeline = TestPipeline::builder()
            .source("reed", Ok(vec![raw("PM", "https://r/1")]))
            .fetch_delay(Duration::from_millis(200))
            .build()
            .await;

        let (first, second) = tokio::join!(pipeline.orchestrator.run_cycle(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pipeline.orchestrator.run_cycle().await
        });

        assert!(matches!(first, CycleOutcome::Persisted(_)));
        assert_eq!(second, CycleOutcome::Busy);
        assert_eq!(pipeline.fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_seeds_config_and_builds_profile() {
        let pipeline = TestPipeline::builder()
            .documents(&[("cv/cv.txt", "Delivery lead, 12 years in banking")])
            .respond(
                "Interview History",
                Ok(r#"{"keywords": ["PMO"], "scoring_rubric": "Favour banking delivery roles"}"#),
            )
            .build()
            .await;

        pipeline.orchestrator.initialize().await.unwrap();
        assert!(pipeline.profiles.current().is_some());

        let settings = SettingsRepository::new(pipeline.database.pool());
        assert!(settings.get(keys::LOCATION).await.unwrap().is_some());
    }
}
