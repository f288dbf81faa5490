// src/testing.rs
//! Mock capabilities and fixtures shared by the unit tests

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::settings::keys;
use crate::core::{Database, JobRepository, SettingsRepository};
use crate::intake::SourceFetcher;
use crate::llm::Completion;
use crate::pipeline::{
    ApprovalDecision, ApprovalGate, Clock, ErrorTracker, Orchestrator, PipelineDeps,
    PipelineSettings, ProfileStore, RepairProposal, ScheduleConfig,
};
use crate::types::job::NOT_AVAILABLE;
use crate::types::{JobRecord, RawJob, RelevanceProfile};

// =============================================================================
// Fixtures
// =============================================================================

pub fn job(title: &str, link: &str) -> JobRecord {
    JobRecord {
        id: None,
        title: title.to_string(),
        company: "Acme".to_string(),
        location: "London".to_string(),
        link: link.to_string(),
        posted_date: None,
        posted_date_text: String::new(),
        salary: NOT_AVAILABLE.to_string(),
        applicants: NOT_AVAILABLE.to_string(),
        job_type: NOT_AVAILABLE.to_string(),
        source: "reed".to_string(),
        match_score: 0,
        match_reasoning: String::new(),
        is_applied: false,
        user_remarks: None,
        user_feedback: None,
        is_external: false,
        created_at: Utc::now(),
    }
}

pub fn raw(title: &str, link: &str) -> RawJob {
    RawJob {
        title: Some(title.to_string()),
        company: Some("Acme".to_string()),
        link: Some(link.to_string()),
        ..RawJob::default()
    }
}

pub fn profile() -> RelevanceProfile {
    RelevanceProfile {
        keywords: vec!["delivery".to_string()],
        preferred_industries: vec!["FinTech".to_string()],
        avoid_keywords: vec![],
        experience_level: "Senior".to_string(),
        core_skills: vec!["Agile".to_string()],
        cultural_fit: "Collaborative".to_string(),
        scoring_rubric: "Reward senior delivery roles in finance".to_string(),
    }
}

// =============================================================================
// Mock Completion
// =============================================================================

/// Answers prompts by the first rule whose needle occurs in the prompt
pub struct MockCompletion {
    rules: Mutex<Vec<(String, Result<String, String>)>>,
    calls: Mutex<Vec<String>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn when(self, needle: &str, response: Result<&str, &str>) -> Self {
        self.rules.lock().unwrap().push((
            needle.to_string(),
            response.map(str::to_string).map_err(str::to_string),
        ));
        self
    }

    pub fn fail_when(self, needle: &str, message: &str) -> Self {
        self.when(needle, Err(message))
    }

    /// Every prompt received, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.lock().unwrap().push(prompt.to_string());

        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Ok(text))) => Ok(text.clone()),
            Some((_, Err(message))) => Err(anyhow::anyhow!("{}", message)),
            None => Err(anyhow::anyhow!("no scripted response for prompt")),
        }
    }
}

// =============================================================================
// Mock Fetcher
// =============================================================================

pub struct MockFetcher {
    responses: HashMap<String, Result<Vec<RawJob>, String>>,
    delay: Duration,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_source(mut self, source: &str, response: Result<Vec<RawJob>, &str>) -> Self {
        self.responses
            .insert(source.to_string(), response.map_err(str::to_string));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// (keyword, source) pairs fetched so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(
        &self,
        keyword: &str,
        source: &str,
        _limit: Option<usize>,
    ) -> Result<Vec<RawJob>> {
        self.calls
            .lock()
            .unwrap()
            .push((keyword.to_string(), source.to_string()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.responses.get(source) {
            Some(Ok(jobs)) => Ok(jobs.clone()),
            Some(Err(message)) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Approval and Clock
// =============================================================================

pub struct ScriptedApproval {
    decision: ApprovalDecision,
    reviews: AtomicUsize,
}

impl ScriptedApproval {
    pub fn new(decision: ApprovalDecision) -> Self {
        Self {
            decision,
            reviews: AtomicUsize::new(0),
        }
    }

    pub fn reviews(&self) -> usize {
        self.reviews.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApprovalGate for ScriptedApproval {
    async fn review(&self, _proposal: &RepairProposal) -> ApprovalDecision {
        self.reviews.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// 2025-11-20 at the given local time
    pub fn at(hour: u32, minute: u32) -> Self {
        let date = NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        Self(date.and_hms_opt(hour, minute, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

// =============================================================================
// Pipeline Harness
// =============================================================================

pub const ORIGINAL_FETCHER_SOURCE: &str = "print('original fetcher')\n";

/// Orchestrator wired to mocks, an in-memory store and a temp directory
pub struct TestPipeline {
    pub orchestrator: Orchestrator,
    pub database: Database,
    pub fetcher: Arc<MockFetcher>,
    pub llm: Arc<MockCompletion>,
    pub approval: Arc<ScriptedApproval>,
    pub tracker: Arc<ErrorTracker>,
    pub profiles: Arc<ProfileStore>,
    fetcher_source: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestPipeline {
    pub fn builder() -> TestPipelineBuilder {
        TestPipelineBuilder::default()
    }

    pub async fn jobs(&self) -> Vec<JobRecord> {
        JobRepository::new(self.database.pool())
            .list_jobs()
            .await
            .unwrap()
    }

    pub async fn fetcher_source(&self) -> String {
        tokio::fs::read_to_string(&self.fetcher_source)
            .await
            .unwrap()
    }
}

pub struct TestPipelineBuilder {
    clock: FixedClock,
    sources: Vec<(String, Result<Vec<RawJob>, String>)>,
    responses: Vec<(String, Result<String, String>)>,
    approval: ApprovalDecision,
    profile: Option<RelevanceProfile>,
    industries: Vec<String>,
    fetch_delay: Duration,
    documents: Vec<(String, String)>,
}

impl Default for TestPipelineBuilder {
    fn default() -> Self {
        Self {
            clock: FixedClock::at(10, 0),
            sources: Vec::new(),
            responses: Vec::new(),
            approval: ApprovalDecision::Rejected,
            profile: None,
            industries: Vec::new(),
            fetch_delay: Duration::ZERO,
            documents: Vec::new(),
        }
    }
}

impl TestPipelineBuilder {
    pub fn clock_at(mut self, hour: u32, minute: u32) -> Self {
        self.clock = FixedClock::at(hour, minute);
        self
    }

    pub fn source(mut self, name: &str, response: Result<Vec<RawJob>, &str>) -> Self {
        self.sources
            .push((name.to_string(), response.map_err(str::to_string)));
        self
    }

    pub fn respond(mut self, needle: &str, response: Result<&str, &str>) -> Self {
        self.responses.push((
            needle.to_string(),
            response.map(str::to_string).map_err(str::to_string),
        ));
        self
    }

    pub fn approval(mut self, decision: ApprovalDecision) -> Self {
        self.approval = decision;
        self
    }

    pub fn profile(mut self, profile: RelevanceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn industries(mut self, industries: &[&str]) -> Self {
        self.industries = industries.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Files under the documents directory, as (relative path, content)
    pub fn documents(mut self, files: &[(&str, &str)]) -> Self {
        self.documents = files
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect();
        self
    }

    pub async fn build(self) -> TestPipeline {
        let dir = tempfile::tempdir().unwrap();
        let fetcher_source = dir.path().join("job_scraper.py");
        tokio::fs::write(&fetcher_source, ORIGINAL_FETCHER_SOURCE)
            .await
            .unwrap();

        let documents_dir = dir.path().join("documents");
        for (path, content) in &self.documents {
            let path = documents_dir.join(path);
            tokio::fs::create_dir_all(path.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(&path, content).await.unwrap();
        }

        let database = Database::in_memory().await.unwrap();
        let source_names: Vec<&str> = self.sources.iter().map(|(n, _)| n.as_str()).collect();
        SettingsRepository::new(database.pool())
            .bulk_set(&[
                (keys::KEYWORDS.to_string(), r#"["Engineer"]"#.to_string()),
                (
                    keys::ENABLED_SOURCES.to_string(),
                    serde_json::to_string(&source_names).unwrap(),
                ),
                (
                    keys::TARGET_INDUSTRIES.to_string(),
                    serde_json::to_string(&self.industries).unwrap(),
                ),
            ])
            .await
            .unwrap();

        let mut fetcher = MockFetcher::new().with_delay(self.fetch_delay);
        for (name, response) in self.sources {
            fetcher.responses.insert(name, response);
        }
        let fetcher = Arc::new(fetcher);

        let llm = Arc::new(MockCompletion::new());
        llm.rules.lock().unwrap().extend(self.responses);

        let approval = Arc::new(ScriptedApproval::new(self.approval));
        let tracker = Arc::new(ErrorTracker::in_memory());
        let profiles = Arc::new(ProfileStore::in_memory(self.profile));

        let settings = PipelineSettings {
            fetch_timeout: Duration::from_secs(2),
            classify_timeout: Duration::from_secs(1),
            scoring_timeout: Duration::from_secs(1),
            repair_timeout: Duration::from_secs(1),
            profile_timeout: Duration::from_secs(1),
            polite_delay: Duration::ZERO,
            fetch_limit: None,
            scoring_concurrency: 2,
            fetcher_source: fetcher_source.clone(),
            repair_model: None,
            documents_dir,
            schedule: ScheduleConfig {
                tick: Duration::from_millis(10),
                interval_unit: Duration::from_millis(50),
                ..ScheduleConfig::default()
            },
        };

        let orchestrator = Orchestrator::new(
            PipelineDeps {
                database: database.clone(),
                fetcher: fetcher.clone(),
                llm: llm.clone(),
                approval: approval.clone(),
                tracker: tracker.clone(),
                profiles: profiles.clone(),
                clock: Arc::new(self.clock),
            },
            settings,
        );

        TestPipeline {
            orchestrator,
            database,
            fetcher,
            llm,
            approval,
            tracker,
            profiles,
            fetcher_source,
            _dir: dir,
        }
    }
}
