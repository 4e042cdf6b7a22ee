pub mod clock;
mod sync_task;
pub mod trigger;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::overfast_api::OverfastClient;
use crate::config::AppConfig;
use crate::scheduler::clock::{Clock, SystemClock};
use crate::scheduler::sync_task::SyncTask;
use crate::scheduler::trigger::{ScheduleZone, Trigger};
use crate::sync::run_report::JobKind;
use crate::sync::{SyncContext, SyncSettings};
use crate::util::sleeper::{Sleeper, TokioSleeper};
use crate::Error;

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self);
}

#[derive(Debug)]
pub enum FireOutcome {
    Started(JoinHandle<()>),
    Skipped,
}

/// A job, its trigger and whether an invocation is currently in flight.
#[derive(Clone)]
pub struct ScheduledJob {
    job: Arc<dyn Job>,
    trigger: Trigger,
    running: Arc<AtomicBool>,
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScheduledJob {
    pub fn new(job: Arc<dyn Job>, trigger: Trigger) -> Self {
        Self {
            job,
            trigger,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    /// Spawns the job body unless the previous invocation is still running.
    /// Skipped firings are dropped, not queued.
    pub fn fire(&self) -> FireOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(job = self.name(), "Previous run still in progress, skipping this firing");
            return FireOutcome::Skipped;
        }

        let guard = RunningGuard(self.running.clone());
        let job = self.job.clone();
        info!(job = self.name(), "Firing job");
        FireOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            job.run().await;
        }))
    }
}

/// Running timer tasks plus the channel that stops them.
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    timers: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn start(
        jobs: Vec<ScheduledJob>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        zone: ScheduleZone,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let timers = jobs
            .iter()
            .map(|job| {
                tokio::spawn(run_timer(
                    job.clone(),
                    clock.clone(),
                    sleeper.clone(),
                    zone,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        info!(jobs = jobs.len(), ?zone, "Scheduler started");
        Self {
            jobs,
            timers,
            shutdown_tx,
        }
    }

    /// Fires every job once in registration order, each after the previous one finished.
    pub fn fire_all(&self) -> JoinHandle<()> {
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            for job in jobs {
                if let FireOutcome::Started(handle) = job.fire() {
                    if let Err(e) = handle.await {
                        error!(job = job.name(), error = ?e, "Job body panicked");
                    }
                }
            }
        })
    }

    /// Stops every timer. Job bodies already running are left to finish or be
    /// dropped with the runtime.
    pub async fn shutdown(self) {
        info!("Stopping scheduler");
        if self.shutdown_tx.send(true).is_err() {
            debug!("All timers had already stopped");
        }
        for timer in self.timers {
            if let Err(e) = timer.await {
                error!(error = ?e, "Scheduler timer task failed");
            }
        }
    }
}

async fn run_timer(
    job: ScheduledJob,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    zone: ScheduleZone,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = clock.now();
        let Some(next) = zone.next_fire(&job.trigger, now) else {
            error!(job = job.name(), trigger = ?job.trigger, "Trigger never fires, stopping timer");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(
            job = job.name(),
            next_run = %next,
            wait_secs = wait.as_secs(),
            "Next scheduled run"
        );

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(job = job.name(), "Timer stopped");
                return;
            }
            _ = sleeper.sleep(wait) => {}
        }

        if let FireOutcome::Started(_) = job.fire() {
            debug!(job = job.name(), "Job body spawned");
        }
    }
}

/// Builds both sync jobs, each with its own upstream client, and starts their timers.
pub fn spawn_scheduler(config: &AppConfig, pool: &SqlitePool) -> Result<Option<Scheduler>, Error> {
    if !config.scheduler.enabled {
        info!("Scheduler is disabled in configuration");
        return Ok(None);
    }

    let settings = SyncSettings::from_config(config);
    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let context = || -> Result<SyncContext, Error> {
        let client = OverfastClient::new(&config.upstream.base_url, config.upstream.timeout())?;
        Ok(SyncContext {
            pool: pool.clone(),
            upstream: Arc::new(client),
            sleeper: sleeper.clone(),
            settings: settings.clone(),
        })
    };

    let scheduler_config = &config.scheduler;
    let jobs = vec![
        ScheduledJob::new(
            Arc::new(SyncTask::new(JobKind::SyncHeroes, context()?)),
            Trigger::Daily {
                hour: scheduler_config.heroes_hour,
                minute: scheduler_config.heroes_minute,
            },
        ),
        ScheduledJob::new(
            Arc::new(SyncTask::new(JobKind::SyncHeroStats, context()?)),
            Trigger::EveryHours {
                every: scheduler_config.stats_every_hours,
                minute: scheduler_config.stats_minute,
            },
        ),
    ];

    let scheduler = Scheduler::start(
        jobs,
        Arc::new(SystemClock),
        sleeper.clone(),
        scheduler_config.zone,
    );
    if scheduler_config.run_on_startup {
        info!("Running every job once at startup");
        scheduler.fire_all();
    }

    Ok(Some(scheduler))
}
