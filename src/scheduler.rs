//! Cron-driven scheduling of rule dispatches and the progress sync.
//!
//! Each scheduled entry point carries a 6-field cron expression (with
//! seconds). A single ticker polls every N seconds and fires whatever is
//! due; job failures are logged and never stop the ticker.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::NotifyConfig;
use crate::dispatch::{DispatchEngine, Rule, RuleSet};
use crate::error::ConfigError;
use crate::progress::ProgressSync;

/// What a scheduled slot runs when due.
#[derive(Clone)]
enum JobKind {
    Rule(Rule),
    ProgressSync,
}

struct ScheduledJob {
    name: &'static str,
    schedule: cron::Schedule,
    next_fire: Option<DateTime<Utc>>,
    kind: JobKind,
}

/// Fires rule dispatches and progress syncs on their cron schedules.
pub struct Scheduler {
    engine: Arc<DispatchEngine>,
    sync: Option<Arc<ProgressSync>>,
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl Scheduler {
    /// Build the schedule table from config. The progress-sync slot exists
    /// only when a sync job was provided.
    pub fn new(
        config: &NotifyConfig,
        engine: Arc<DispatchEngine>,
        sync: Option<Arc<ProgressSync>>,
    ) -> Result<Self, ConfigError> {
        let rules = RuleSet::from_config(config);
        let now = Utc::now();

        let mut jobs = vec![
            Self::job(
                "progress-update",
                &config.schedules.progress_rule,
                JobKind::Rule(rules.progress),
                now,
            )?,
            Self::job(
                "pre-expiry-reminder",
                &config.schedules.review_rule,
                JobKind::Rule(rules.review),
                now,
            )?,
            Self::job(
                "completion",
                &config.schedules.completion_rule,
                JobKind::Rule(rules.completion),
                now,
            )?,
        ];
        if sync.is_some() {
            jobs.push(Self::job(
                "progress-sync",
                &config.schedules.progress_sync,
                JobKind::ProgressSync,
                now,
            )?);
        }

        Ok(Self {
            engine,
            sync,
            jobs: Mutex::new(jobs),
        })
    }

    fn job(
        name: &'static str,
        expr: &str,
        kind: JobKind,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob, ConfigError> {
        let schedule = cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
            key: name.to_string(),
            message: format!("invalid cron expression {expr:?}: {e}"),
        })?;
        let next_fire = schedule.after(&now).next();
        Ok(ScheduledJob {
            name,
            schedule,
            next_fire,
            kind,
        })
    }

    /// Fire every job due at `now` and reschedule it. Returns how many fired.
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<(&'static str, JobKind)> = {
            let mut jobs = self.jobs.lock().await;
            let mut due = Vec::new();
            for job in jobs.iter_mut() {
                let Some(next) = job.next_fire else { continue };
                if next <= now {
                    job.next_fire = job.schedule.after(&now).next();
                    due.push((job.name, job.kind.clone()));
                }
            }
            due
        };

        for (name, kind) in &due {
            debug!(job = name, "Scheduled job due");
            self.fire(name, kind).await;
        }
        due.len()
    }

    async fn fire(&self, name: &str, kind: &JobKind) {
        match kind {
            JobKind::Rule(rule) => {
                if let Err(e) = self.engine.dispatch(rule).await {
                    error!(job = name, "Rule dispatch failed: {e}");
                }
            }
            JobKind::ProgressSync => {
                let Some(sync) = &self.sync else { return };
                if let Err(e) = sync.run().await {
                    error!(job = name, "Progress sync failed: {e}");
                }
            }
        }
    }

    /// Next fire times, for startup logging.
    pub async fn upcoming(&self) -> Vec<(&'static str, Option<DateTime<Utc>>)> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|j| (j.name, j.next_fire))
            .collect()
    }
}

/// Spawn the scheduler ticker loop.
pub fn spawn_ticker(scheduler: Arc<Scheduler>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let fired = scheduler.tick(Utc::now()).await;
            if fired > 0 {
                info!(fired, "Scheduler tick fired jobs");
            }
        }
    })
}

// ── Tests ───────────────────────────────────────────────────────────
