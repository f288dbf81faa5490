// src/pipeline/schedule.rs
//! Daily run window and the recurring cycle loop

use anyhow::Result;
use chrono::{Local, NaiveDateTime, NaiveTime};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::orchestrator::{CycleOutcome, Orchestrator};
use crate::core::settings::DEFAULT_INTERVAL_MINUTES;
use crate::core::SettingsRepository;

const COMPONENT: &str = "Scheduler";

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Half-open `[start, end)` window of local time in which cycles may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl ScheduleWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start >= end {
            anyhow::bail!(
                "Schedule window start {} must be before end {}",
                start.format("%H:%M"),
                end.format("%H:%M")
            );
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub window: ScheduleWindow,
    /// Granularity of the wait loop
    pub tick: Duration,
    /// Length of one `schedule_interval` step
    pub interval_unit: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            window: ScheduleWindow::default(),
            tick: Duration::from_secs(60),
            interval_unit: Duration::from_secs(60),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self, steps: u64) -> Duration {
        self.interval_unit
            .saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX))
    }
}

impl Orchestrator {
    /// Run one cycle now, then one every `schedule_interval` minutes while
    /// inside the window, until `shutdown` is cancelled.
    ///
    /// The interval is re-read on every tick, so a config change applies to
    /// the wait already in progress. A cycle in flight is dropped on shutdown;
    /// an open batch insert rolls back and a running fetcher process is killed.
    pub async fn run_schedule(&self, shutdown: CancellationToken) {
        let schedule = self.schedule_config();
        self.audit()
            .info(
                COMPONENT,
                &format!(
                    "Scheduler started, window {}-{}",
                    schedule.window.start().format("%H:%M"),
                    schedule.window.end().format("%H:%M")
                ),
            )
            .await;

        // startup run is not window-gated
        if self.until_shutdown(&shutdown, self.run_cycle()).await.is_none() {
            return;
        }

        loop {
            let interval = self.interval_minutes().await;
            self.audit()
                .info(COMPONENT, &format!("Next run in {} minutes.", interval))
                .await;

            let mut waited = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.audit().info(COMPONENT, "Scheduler stopped.").await;
                        return;
                    }
                    _ = tokio::time::sleep(schedule.tick) => {}
                }

                waited += schedule.tick;
                let interval = self.interval_minutes().await;
                if waited >= schedule.interval(interval) {
                    break;
                }
                debug!(
                    "Waiting for next run: {}s of {}m elapsed",
                    waited.as_secs(),
                    interval
                );
            }

            if self
                .until_shutdown(&shutdown, self.run_scheduled_tick())
                .await
                .is_none()
            {
                return;
            }
        }
    }

    async fn until_shutdown<F: Future>(
        &self,
        shutdown: &CancellationToken,
        work: F,
    ) -> Option<F::Output> {
        let output = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            output = work => Some(output),
        };
        // the interrupted cycle is dropped by now and holds no connection
        if output.is_none() {
            self.audit()
                .warning(COMPONENT, "Scheduler stopped during a cycle.")
                .await;
        }
        output
    }

    /// Run a cycle if the clock is inside the window; `None` when skipped
    pub async fn run_scheduled_tick(&self) -> Option<CycleOutcome> {
        let schedule = self.schedule_config();
        let now = self.clock().now();

        if !schedule.window.contains(now.time()) {
            self.audit()
                .info(
                    COMPONENT,
                    &format!(
                        "Skipping run at {} (outside {}-{} window).",
                        now.format("%H:%M"),
                        schedule.window.start().format("%H:%M"),
                        schedule.window.end().format("%H:%M")
                    ),
                )
                .await;
            return None;
        }

        Some(self.run_cycle().await)
    }

    async fn interval_minutes(&self) -> u64 {
        match SettingsRepository::new(self.database().pool())
            .schedule_interval_minutes()
            .await
        {
            Ok(minutes) => minutes,
            Err(e) => {
                warn!("Failed to read schedule interval: {:#}", e);
                DEFAULT_INTERVAL_MINUTES
            }
        }
    }
}
