//! Periodic maintenance orchestrator
//!
//! Runs the five recurring jobs (paid fetch, free fetch, bulk validation,
//! expiry cleanup, pool optimisation) on cron cadences. Each job executes
//! inline in its own loop and the next fire time is computed only after the
//! job returns, so a job can never overlap itself; ticks that pass while a
//! job is still running are skipped. Different jobs run independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{JobSchedule, ScheduleConfig};
use crate::error::Result;
use crate::pool::Pool;
use crate::repository::UsageRepository;
use crate::sources::Source;

/// Usage records older than this many days are pruned during cleanup
const USAGE_RETENTION_DAYS: i64 = 7;

/// Recurring-job orchestrator
pub struct Orchestrator {
    pool: Arc<Pool>,
    usage: UsageRepository,
    paid_sources: Arc<Vec<Box<dyn Source>>>,
    free_sources: Arc<Vec<Box<dyn Source>>>,
    schedule: ScheduleConfig,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<Pool>,
        usage: UsageRepository,
        paid_sources: Vec<Box<dyn Source>>,
        free_sources: Vec<Box<dyn Source>>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            pool,
            usage,
            paid_sources: Arc::new(paid_sources),
            free_sources: Arc::new(free_sources),
            schedule,
        }
    }

    /// Announce cadences, then drive every job loop until shutdown.
    /// In-flight jobs complete during the drain; the next tick never fires.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("Recurring job plan:");
        info!(cadence = %self.schedule.paid_interval.expr, "- paid source fetch");
        info!(cadence = %self.schedule.free_interval.expr, "- free source fetch");
        info!(cadence = %self.schedule.validate_interval.expr, "- bulk validation");
        info!(cadence = %self.schedule.cleanup_interval.expr, "- expiry cleanup");
        info!(cadence = %self.schedule.optimize_interval.expr, "- pool optimisation");

        let mut handles = Vec::new();

        if !self.paid_sources.is_empty() {
            let pool = self.pool.clone();
            let sources = self.paid_sources.clone();
            handles.push(tokio::spawn(run_job_loop(
                "fetch_paid",
                self.schedule.paid_interval.clone(),
                shutdown.clone(),
                move || {
                    let pool = pool.clone();
                    let sources = sources.clone();
                    async move { fetch_and_ingest(&pool, &sources).await }
                },
            )));
        }

        if !self.free_sources.is_empty() {
            let pool = self.pool.clone();
            let sources = self.free_sources.clone();
            handles.push(tokio::spawn(run_job_loop(
                "fetch_free",
                self.schedule.free_interval.clone(),
                shutdown.clone(),
                move || {
                    let pool = pool.clone();
                    let sources = sources.clone();
                    async move { fetch_and_ingest(&pool, &sources).await }
                },
            )));
        }

        let pool = self.pool.clone();
        handles.push(tokio::spawn(run_job_loop(
            "validate_all",
            self.schedule.validate_interval.clone(),
            shutdown.clone(),
            move || {
                let pool = pool.clone();
                async move { pool.validator().validate_all().await.map(|_| ()) }
            },
        )));

        let pool = self.pool.clone();
        let usage = self.usage.clone();
        handles.push(tokio::spawn(run_job_loop(
            "cleanup_expired",
            self.schedule.cleanup_interval.clone(),
            shutdown.clone(),
            move || {
                let pool = pool.clone();
                let usage = usage.clone();
                async move {
                    pool.repo().cleanup_expired().await?;
                    usage.prune_older_than_days(USAGE_RETENTION_DAYS).await?;
                    Ok(())
                }
            },
        )));

        let pool = self.pool.clone();
        handles.push(tokio::spawn(run_job_loop(
            "optimize_pool",
            self.schedule.optimize_interval.clone(),
            shutdown,
            move || {
                let pool = pool.clone();
                async move { pool.repo().optimize().await.map(|_| ()) }
            },
        )));

        info!(jobs = handles.len(), "Orchestrator started");

        for handle in handles {
            let _ = handle.await;
        }

        info!("Orchestrator stopped");
    }
}

/// Run every source in order, collect candidates across all of them, then
/// push the batch through validation and ingestion. A failing source is a
/// failure boundary: it is logged and the remaining sources still run.
async fn fetch_and_ingest(pool: &Pool, sources: &[Box<dyn Source>]) -> Result<()> {
    let mut all = Vec::new();

    for source in sources {
        match source.fetch().await {
            Ok(candidates) => {
                info!(
                    source = source.name(),
                    count = candidates.len(),
                    "Source fetch succeeded"
                );
                all.extend(candidates);
            }
            Err(e) => {
                error!(source = source.name(), error = %e, "Source fetch failed");
            }
        }
    }

    if all.is_empty() {
        warn!("No candidates fetched this round");
        return Ok(());
    }

    let summary = pool.ingest(all).await?;
    info!(
        inserted = summary.inserted,
        refreshed = summary.refreshed,
        "Fetch round complete"
    );

    Ok(())
}

/// Drive one recurring job until shutdown. The next fire time is computed
/// from the clock after the job finishes, which is what guarantees
/// skip-if-still-running.
async fn run_job_loop<F, Fut>(
    name: &'static str,
    schedule: JobSchedule,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    info!(job = name, cadence = %schedule.expr, "Job loop started");

    loop {
        let delay = match delay_until_next(&schedule.schedule) {
            Some(d) => d,
            None => {
                warn!(job = name, "Schedule has no upcoming fire time; stopping loop");
                break;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                if let Err(e) = job().await {
                    error!(job = name, error = %e, "Job failed; retrying on next tick");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(job = name, "Job loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Time until the schedule's next fire, measured from now
fn delay_until_next(schedule: &Schedule) -> Option<Duration> {
    let next = schedule.upcoming(Utc).next()?;
    Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}
