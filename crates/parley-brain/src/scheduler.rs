//! Recurring prompts driven by cron expressions.
//!
//! Jobs bypass the per-user lifecycle entirely: they call
//! [`Controller::run_once`] and post whatever comes back to a fixed chat.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use parley_core::config::SchedulerConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::ChatId;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::controller::Controller;

/// Parse a cron expression. Classic five-field expressions get a leading
/// seconds field of `0`.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let full = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&full)
        .map_err(|e| ParleyError::Scheduler(format!("invalid cron '{expr}': {e}")))
}

struct Job {
    name: String,
    schedule: Schedule,
    prompt: String,
    chat_id: ChatId,
    next_run: Option<DateTime<FixedOffset>>,
}

pub struct Scheduler {
    controller: Arc<Controller>,
    jobs: Vec<Job>,
    offset: FixedOffset,
    check_interval: Duration,
}

impl Scheduler {
    pub fn from_config(controller: Arc<Controller>, config: &SchedulerConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(config.timezone_offset * 3600).ok_or_else(|| {
            ParleyError::Scheduler(format!("invalid timezone offset {}", config.timezone_offset))
        })?;
        let start = Utc::now().with_timezone(&offset);
        Self::starting_at(controller, config, offset, start)
    }

    fn starting_at(
        controller: Arc<Controller>,
        config: &SchedulerConfig,
        offset: FixedOffset,
        start: DateTime<FixedOffset>,
    ) -> Result<Self> {
        let jobs = config
            .tasks
            .iter()
            .map(|task| {
                let schedule = parse_cron(&task.cron)?;
                let next_run = schedule.after(&start).next();
                Ok(Job {
                    name: task.name.clone(),
                    schedule,
                    prompt: task.prompt.clone(),
                    chat_id: task.chat_id,
                    next_run,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            controller,
            jobs,
            offset,
            check_interval: Duration::from_secs(config.check_interval_secs.max(1)),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Start every job due at `now` and move it to its next occurrence.
    /// Returns the handles of the started runs.
    fn tick(&mut self, now: DateTime<FixedOffset>) -> Vec<JoinHandle<()>> {
        let mut started = Vec::new();
        for job in &mut self.jobs {
            let Some(due) = job.next_run else { continue };
            if due > now {
                continue;
            }

            info!(task = %job.name, due = %due, "running scheduled task");
            job.next_run = job.schedule.after(&now).next();

            let controller = Arc::clone(&self.controller);
            let name = job.name.clone();
            let prompt = job.prompt.clone();
            let chat_id = job.chat_id;
            started.push(tokio::spawn(async move {
                run_job(&controller, &name, &prompt, chat_id).await;
            }));
        }
        started
    }

    pub async fn run(mut self) {
        info!(jobs = self.jobs.len(), "scheduler started");
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            ticker.tick().await;
            let now = Utc::now().with_timezone(&self.offset);
            self.tick(now);
        }
    }
}

async fn run_job(controller: &Controller, name: &str, prompt: &str, chat_id: ChatId) {
    let outcome = match controller.run_once(prompt, None).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(task = name, error = %e, "scheduled task failed");
            return;
        }
    };
    if outcome.is_error {
        warn!(task = name, detail = %outcome.text, "scheduled task reported an error");
        return;
    }

    let text = if outcome.text.trim().is_empty() {
        "(no output)"
    } else {
        outcome.text.as_str()
    };
    if let Err(e) = controller.deliver(chat_id, text, None, &[]).await {
        error!(task = name, chat_id, error = %e, "failed to deliver scheduled result");
    }
}
