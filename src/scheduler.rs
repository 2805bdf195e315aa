//! The job evaluator.
//!
//! Once per minute, every loaded job whose cron expression matches the
//! current minute is submitted to the execution engine. Submission is
//! fire-and-forget (a long run must not delay the next tick) but the runs
//! themselves still serialize through the global queue like everything
//! else. A tick that the host skips (system sleep, suspended VM) simply
//! misses that minute's matches; there is no backfill.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tracing::{error, info, warn};

use crate::cron;
use crate::jobs::Job;
use crate::runner::{ResultNotifier, Runner};
use crate::state::StatusFile;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

pub struct JobScheduler {
    runner: Arc<Runner>,
    jobs: Vec<Job>,
    status: Arc<StatusFile>,
    notifier: Option<ResultNotifier>,
}

impl JobScheduler {
    pub fn new(
        runner: Arc<Runner>,
        jobs: Vec<Job>,
        status: Arc<StatusFile>,
        notifier: Option<ResultNotifier>,
    ) -> Self {
        Self {
            runner,
            jobs,
            status,
            notifier,
        }
    }

    /// Start the tick loop in a background task. Each tick's errors are
    /// caught and logged; ticks stay independent of each other.
    pub fn spawn(self) {
        if self.jobs.is_empty() {
            info!("No jobs configured; scheduler idle");
            return;
        }
        for job in &self.jobs {
            info!(name = %job.name, schedule = %job.schedule, "Scheduling job");
        }

        tokio::spawn(async move {
            self.publish_next_runs().await;
            loop {
                tokio::time::sleep(TICK_INTERVAL).await;
                self.tick().await;
            }
        });
    }

    async fn tick(&self) {
        let now = Local::now();
        for job in &self.jobs {
            match cron::matches(&job.schedule, &now) {
                Ok(true) => self.fire(job),
                Ok(false) => {}
                Err(e) => warn!(name = %job.name, "Schedule match failed: {}", e),
            }
        }
        self.publish_next_runs().await;
    }

    /// Submit one due job. The spawned task owns waiting for the queued run
    /// and reporting its outcome.
    fn fire(&self, job: &Job) {
        info!(name = %job.name, "Job due");
        let runner = Arc::clone(&self.runner);
        let notifier = self.notifier.clone();
        let job = job.clone();
        tokio::spawn(async move {
            match runner.run(&job.name, &job.prompt, None).await {
                Ok(result) => {
                    if result.exit_code == 0 {
                        info!(name = %job.name, "Job completed");
                    } else {
                        warn!(
                            name = %job.name,
                            exit_code = result.exit_code,
                            "Job finished with error"
                        );
                    }
                    if let Some(notify) = &notifier {
                        notify(&job.name, &result);
                    }
                }
                Err(e) => error!(name = %job.name, "Job failed: {}", e),
            }
        });
    }

    /// Refresh each job's next due time in the state file, for display only.
    async fn publish_next_runs(&self) {
        let now = Local::now();
        let mut next_runs = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            match cron::next_match(&job.schedule, &now) {
                Ok(next) => next_runs.push((job.name.clone(), next.with_timezone(&Utc))),
                Err(e) => warn!(name = %job.name, "No next run: {}", e),
            }
        }
        self.status.set_jobs(next_runs).await;
    }
}
