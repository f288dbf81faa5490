// src/environment.rs
use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::pipeline::schedule::ScheduleWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub database_path: PathBuf,
    pub documents_dir: PathBuf,
    pub profile_path: PathBuf,
    pub error_tracker_path: PathBuf,
    pub log_path: PathBuf,
    pub fetcher: FetcherSettings,
    pub llm: LlmSettings,
    pub timeouts: TimeoutSettings,
    pub schedule: ScheduleSettings,
    pub scoring: ScoringSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherSettings {
    pub program: String,
    pub script: PathBuf,
    pub polite_delay_ms: u64,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub repair_model: Option<String>,
    pub api_key_env: String,
}

/// Upper bounds, in seconds, for every external capability call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub fetch: u64,
    pub scoring: u64,
    pub classify: u64,
    pub repair: u64,
    pub approval: u64,
    pub profile: u64,
    pub http: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    pub tick_seconds: u64,
    pub window_start: String,
    pub window_end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub concurrency: usize,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    local: Option<EnvironmentConfig>,
    #[serde(default)]
    production: Option<EnvironmentConfig>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/jobscout.db"),
            documents_dir: PathBuf::from("documents"),
            profile_path: PathBuf::from("data/success_persona.json"),
            error_tracker_path: PathBuf::from("data/error_tracker.json"),
            log_path: PathBuf::from("/tmp/jobscout.log"),
            fetcher: FetcherSettings::default(),
            llm: LlmSettings::default(),
            timeouts: TimeoutSettings::default(),
            schedule: ScheduleSettings::default(),
            scoring: ScoringSettings::default(),
        }
    }
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            script: PathBuf::from("job_scraper.py"),
            polite_delay_ms: 2000,
            limit: None,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.0-flash".to_string(),
            repair_model: None,
            api_key_env: "LLM_API_KEY".to_string(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            fetch: 300,
            scoring: 120,
            classify: 30,
            repair: 180,
            approval: 900,
            profile: 180,
            http: 90,
        }
    }
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            tick_seconds: 60,
            window_start: "09:00".to_string(),
            window_end: "21:00".to_string(),
        }
    }
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self { concurrency: 2 }
    }
}

impl TimeoutSettings {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch)
    }

    pub fn scoring(&self) -> Duration {
        Duration::from_secs(self.scoring)
    }

    pub fn classify(&self) -> Duration {
        Duration::from_secs(self.classify)
    }

    pub fn repair(&self) -> Duration {
        Duration::from_secs(self.repair)
    }

    pub fn approval(&self) -> Duration {
        Duration::from_secs(self.approval)
    }

    pub fn profile(&self) -> Duration {
        Duration::from_secs(self.profile)
    }

    pub fn http(&self) -> Duration {
        Duration::from_secs(self.http)
    }
}

impl ScheduleSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.max(1))
    }

    pub fn window(&self) -> Result<ScheduleWindow> {
        let start = NaiveTime::parse_from_str(&self.window_start, "%H:%M")
            .with_context(|| format!("Invalid schedule window start: {}", self.window_start))?;
        let end = NaiveTime::parse_from_str(&self.window_end, "%H:%M")
            .with_context(|| format!("Invalid schedule window end: {}", self.window_end))?;
        ScheduleWindow::new(start, end)
    }
}

impl EnvironmentConfig {
    /// Load configuration based on environment
    pub fn load() -> Result<Self> {
        let environment = Self::get_environment();
        info!("Loading configuration for environment: {}", environment);

        Self::load_from_file(Path::new("config.yaml"), &environment)
    }

    fn get_environment() -> String {
        std::env::var("JOBSCOUT_ENV")
            .or_else(|_| std::env::var("ENVIRONMENT"))
            .or_else(|_| std::env::var("ENV"))
            .unwrap_or_else(|_| "local".to_string())
    }

    pub fn load_from_file(config_path: &Path, environment: &str) -> Result<Self> {
        let env_config = if config_path.exists() {
            let config_content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;

            let config_file: ConfigFile = serde_yaml::from_str(&config_content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;

            match environment {
                "production" => config_file.production,
                _ => config_file.local,
            }
            .unwrap_or_default()
        } else {
            info!(
                "{} not found, using built-in defaults",
                config_path.display()
            );
            Self::default()
        };

        // Fail early on a malformed window rather than on the first tick
        env_config.schedule.window()?;

        // Make paths absolute
        Ok(Self {
            database_path: Self::resolve_path(&env_config.database_path)?,
            documents_dir: Self::resolve_path(&env_config.documents_dir)?,
            profile_path: Self::resolve_path(&env_config.profile_path)?,
            error_tracker_path: Self::resolve_path(&env_config.error_tracker_path)?,
            log_path: Self::resolve_path(&env_config.log_path)?,
            fetcher: FetcherSettings {
                script: Self::resolve_path(&env_config.fetcher.script)?,
                ..env_config.fetcher
            },
            ..env_config
        })
    }

    fn resolve_path(path: &Path) -> Result<PathBuf> {
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            // For relative paths, resolve from current working directory
            let current_dir = std::env::current_dir().context("Failed to get current directory")?;
            Ok(current_dir.join(path))
        }
    }

    /// Ensure the directories holding state files exist
    pub async fn ensure_directories(&self) -> Result<()> {
        let files = [
            &self.database_path,
            &self.profile_path,
            &self.error_tracker_path,
        ];

        for file in files {
            if let Some(parent) = file.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        info!("All configured directories ensured to exist");
        Ok(())
    }
}
