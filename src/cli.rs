// src/cli.rs
use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{AuditLog, Database, JobRepository, SettingsRepository};
use crate::environment::EnvironmentConfig;
use crate::export::export_csv;
use crate::intake::{ExternalProcessor, ScriptFetcher};
use crate::llm::{Completion, LlmClient};
use crate::pipeline::{
    operator_channel, run_console_operator, ApprovalGate, CycleOutcome, ErrorTracker,
    Orchestrator, PipelineDeps, PipelineSettings, ProfileStore, SystemClock,
};
use crate::types::JobUpdate;

#[derive(Parser)]
#[command(name = "jobscout")]
#[command(about = "Scheduled job intake with scoring and operator-approved fetcher repair")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Reject every repair proposal without prompting
    #[arg(long, global = true)]
    pub unattended: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the database and seed default configuration
    Init,
    /// Run a single intake cycle now
    RunOnce,
    /// Run cycles on the configured interval until Ctrl-C
    Schedule,
    /// Rebuild the relevance profile from documents and feedback
    BuildProfile,
    /// Add and evaluate a job link by hand
    Submit { url: String },
    /// List stored jobs, best match first
    Jobs {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Record application status or feedback on a job
    Update {
        id: i64,
        #[arg(long)]
        applied: Option<bool>,
        #[arg(long)]
        remarks: Option<String>,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Delete jobs by id
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Read or change runtime configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Show the most recent audit entries
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Write stored jobs to a CSV file
    Export {
        #[arg(long, default_value = "jobs.csv")]
        out: PathBuf,
        /// Include postings older than a week
        #[arg(long)]
        all: bool,
    },
    /// Show recurring error counts
    Errors,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

pub async fn handle_command(cli: Cli, env: EnvironmentConfig) -> Result<()> {
    env.ensure_directories().await?;
    let database = Database::new(&env.database_path).await?;
    let pool = database.pool();

    match cli.command {
        Command::Init => {
            database.health_check().await?;
            SettingsRepository::new(pool).seed_defaults().await?;
            println!("Initialized database at {}", env.database_path.display());
        }

        Command::RunOnce => {
            let shutdown = CancellationToken::new();
            let approval = approval_gate(&env, cli.unattended, &shutdown);
            let orchestrator = build_orchestrator(&env, database.clone(), approval).await?;
            orchestrator.initialize().await?;

            let outcome = orchestrator.run_cycle().await;
            shutdown.cancel();
            report_outcome(&outcome);
            if let CycleOutcome::Failed(e) = outcome {
                return Err(e.into());
            }
        }

        Command::Schedule => {
            let shutdown = CancellationToken::new();
            let approval = approval_gate(&env, cli.unattended, &shutdown);
            let orchestrator = build_orchestrator(&env, database.clone(), approval).await?;
            orchestrator.initialize().await?;

            let ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    ctrl_c.cancel();
                }
            });

            orchestrator.run_schedule(shutdown).await;
        }

        Command::BuildProfile => {
            // no cycle runs, so no repair can ask for approval
            let (gate, _) = operator_channel(env.timeouts.approval());
            let orchestrator = build_orchestrator(&env, database.clone(), Arc::new(gate)).await?;
            let profile = orchestrator.rebuild_profile().await?;
            println!("{}", profile.to_prompt_json());
        }

        Command::Submit { url } => {
            let llm = llm_client(&env)?;
            let profiles = Arc::new(ProfileStore::load(env.profile_path.clone()).await?);
            let processor = ExternalProcessor::new(
                llm,
                profiles,
                database.clone(),
                env.timeouts.http(),
                env.timeouts.scoring(),
            )?;

            let job = processor.submit(&url).await?;
            println!(
                "#{} {} @ {} - score {}\n{}",
                job.id.unwrap_or_default(),
                job.title,
                job.company,
                job.match_score,
                job.match_reasoning
            );
        }

        Command::Jobs { limit } => {
            let jobs = JobRepository::new(pool).list_jobs().await?;
            let shown = limit.unwrap_or(jobs.len());
            for job in jobs.iter().take(shown) {
                println!(
                    "{:>5}  {:>3}  {}  {:<10}  {} @ {}  {}",
                    job.id.unwrap_or_default(),
                    job.match_score,
                    if job.is_applied { "A" } else { "-" },
                    job.posted_date
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    job.title,
                    job.company,
                    job.link
                );
            }
            println!("{} of {} jobs", shown.min(jobs.len()), jobs.len());
        }

        Command::Update {
            id,
            applied,
            remarks,
            feedback,
        } => {
            let update = JobUpdate {
                is_applied: applied,
                user_remarks: remarks,
                user_feedback: feedback,
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to update; pass --applied, --remarks or --feedback");
            }
            if !JobRepository::new(pool).update_job(id, &update).await? {
                anyhow::bail!("Job {} not found", id);
            }
            println!("Updated job {}", id);
        }

        Command::Delete { ids } => {
            let deleted = JobRepository::new(pool).delete_jobs(&ids).await?;
            println!("Deleted {} jobs", deleted);
        }

        Command::Config { action } => {
            let settings = SettingsRepository::new(pool);
            match action {
                ConfigCommand::Get { key } => match settings.get(&key).await? {
                    Some(value) => println!("{}", value),
                    None => anyhow::bail!("Config key '{}' is not set", key),
                },
                ConfigCommand::Set { key, value } => {
                    settings.set(&key, &value).await?;
                    println!("{} = {}", key, value);
                }
                ConfigCommand::List => {
                    for (key, value) in settings.list().await? {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }

        Command::Logs { limit } => {
            let entries = AuditLog::new(pool.clone()).recent(limit).await?;
            for entry in entries.iter().rev() {
                println!(
                    "{} [{}] {}: {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.status,
                    entry.agent_name,
                    entry.message
                );
            }
        }

        Command::Export { out, all } => {
            let jobs = JobRepository::new(pool).list_jobs().await?;
            let file = std::fs::File::create(&out)
                .with_context(|| format!("Failed to create {}", out.display()))?;
            let rows = export_csv(&jobs, file, Local::now().date_naive(), all)?;
            println!("Exported {} jobs to {}", rows, out.display());
        }

        Command::Errors => {
            let tracker = ErrorTracker::load(env.error_tracker_path.clone()).await?;
            let snapshot = tracker.snapshot().await;
            if snapshot.is_empty() {
                println!("No recorded errors");
            }
            for (category, entry) in snapshot {
                println!(
                    "{}: {} (first {}, last {})",
                    category,
                    entry.count,
                    entry.first_seen.format("%Y-%m-%d %H:%M"),
                    entry.last_seen.format("%Y-%m-%d %H:%M")
                );
                for detail in &entry.details {
                    println!("    {}", detail);
                }
            }
        }
    }

    Ok(())
}

fn llm_client(env: &EnvironmentConfig) -> Result<Arc<dyn Completion>> {
    Ok(Arc::new(LlmClient::new(&env.llm, env.timeouts.http())?))
}

/// Console operator unless unattended; without one every proposal is rejected
fn approval_gate(
    env: &EnvironmentConfig,
    unattended: bool,
    shutdown: &CancellationToken,
) -> Arc<dyn ApprovalGate> {
    let (gate, inbox) = operator_channel(env.timeouts.approval());
    if unattended {
        warn!("Running unattended: repair proposals will be rejected");
        drop(inbox);
    } else {
        tokio::spawn(run_console_operator(inbox, shutdown.clone()));
    }
    Arc::new(gate)
}

async fn build_orchestrator(
    env: &EnvironmentConfig,
    database: Database,
    approval: Arc<dyn ApprovalGate>,
) -> Result<Orchestrator> {
    let deps = PipelineDeps {
        database,
        fetcher: Arc::new(ScriptFetcher::new(
            env.fetcher.program.clone(),
            env.fetcher.script.clone(),
        )),
        llm: llm_client(env)?,
        approval,
        tracker: Arc::new(ErrorTracker::load(env.error_tracker_path.clone()).await?),
        profiles: Arc::new(ProfileStore::load(env.profile_path.clone()).await?),
        clock: Arc::new(SystemClock),
    };

    Ok(Orchestrator::new(
        deps,
        PipelineSettings::from_environment(env)?,
    ))
}

fn report_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Busy => println!("Another cycle is running"),
        CycleOutcome::NoRecords => println!("No jobs found"),
        CycleOutcome::NothingValid => println!("No valid jobs"),
        CycleOutcome::AllSeen => println!("No new jobs"),
        CycleOutcome::Persisted(batch) => println!(
            "Saved {} new jobs ({} duplicates skipped)",
            batch.inserted, batch.skipped
        ),
        CycleOutcome::RepairTriggered(repair) => println!("Repair attempted: {:?}", repair),
        CycleOutcome::Failed(e) => println!("Cycle failed: {}", e),
    }
}
