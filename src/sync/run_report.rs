use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::database::sync_logs_db::{self, NewSyncLog};
use crate::database::types::SyncStatus;
use crate::util::dates;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    SyncHeroes,
    SyncHeroStats,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::SyncHeroes, JobKind::SyncHeroStats];

    pub fn task_name(self) -> &'static str {
        match self {
            JobKind::SyncHeroes => "sync_heroes",
            JobKind::SyncHeroStats => "sync_hero_stats",
        }
    }
}

/// Where a run currently is; carried into the summary when a run aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Started,
    FetchingRoster,
    FetchingUnit(usize),
    Persisted(usize),
    Aggregated,
    Logged,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Started => f.write_str("starting"),
            RunPhase::FetchingRoster => f.write_str("fetching roster"),
            RunPhase::FetchingUnit(i) => write!(f, "fetching unit {}", i + 1),
            RunPhase::Persisted(i) => write!(f, "persisted unit {}", i + 1),
            RunPhase::Aggregated => f.write_str("aggregated"),
            RunPhase::Logged => f.write_str("logged"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub kind: JobKind,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: usize,
    pub failed_units: Vec<String>,
    pub saved: usize,
    pub summary: Option<String>,
}

/// Accumulates per-unit outcomes for one run. Unit failures are only counted
/// here; they never abort the run.
#[derive(Debug)]
pub struct RunTracker {
    kind: JobKind,
    phase: RunPhase,
    started_at: DateTime<Utc>,
    units: usize,
    failed_units: Vec<String>,
    saved: usize,
}

impl RunTracker {
    pub fn start(kind: JobKind) -> Self {
        Self::started_at(kind, Utc::now())
    }

    pub fn started_at(kind: JobKind, started_at: DateTime<Utc>) -> Self {
        info!(task = kind.task_name(), "Sync run started");
        Self {
            kind,
            phase: RunPhase::Started,
            started_at,
            units: 0,
            failed_units: Vec::new(),
            saved: 0,
        }
    }

    pub fn enter(&mut self, phase: RunPhase) {
        debug!(task = self.kind.task_name(), from = %self.phase, to = %phase, "Run phase");
        self.phase = phase;
    }

    pub fn unit_succeeded(&mut self, index: usize, saved: usize) {
        self.units += 1;
        self.saved += saved;
        self.enter(RunPhase::Persisted(index));
    }

    pub fn unit_failed(&mut self, index: usize, unit: impl Into<String>) {
        self.units += 1;
        self.failed_units.push(unit.into());
        self.enter(RunPhase::Persisted(index));
    }

    /// Every unit has been attempted.
    pub fn aggregate(mut self) -> RunReport {
        self.enter(RunPhase::Aggregated);
        let summary = if self.failed_units.is_empty() {
            None
        } else {
            Some(match self.kind {
                JobKind::SyncHeroes => format!("failed heroes: {}", self.failed_units.join(", ")),
                JobKind::SyncHeroStats => format!(
                    "{} of {} tasks failed: {}",
                    self.failed_units.len(),
                    self.units,
                    self.failed_units.join(", ")
                ),
            })
        };
        let status = if self.failed_units.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Failed
        };
        self.into_report(status, summary)
    }

    /// The roster could not be fetched, so there was nothing to iterate.
    pub fn roster_failed(mut self, reason: &str) -> RunReport {
        self.enter(RunPhase::Aggregated);
        self.into_report(SyncStatus::Failed, Some(format!("roster fetch failed: {reason}")))
    }

    /// An error outside any unit stopped the fan-out.
    pub fn aborted(mut self, reason: &str) -> RunReport {
        let phase = self.phase;
        self.enter(RunPhase::Aggregated);
        self.into_report(
            SyncStatus::Failed,
            Some(format!("aborted while {phase}: {reason}")),
        )
    }

    fn into_report(self, status: SyncStatus, summary: Option<String>) -> RunReport {
        RunReport {
            kind: self.kind,
            status,
            started_at: self.started_at,
            finished_at: Utc::now(),
            units: self.units,
            failed_units: self.failed_units,
            saved: self.saved,
            summary,
        }
    }
}

/// Records the run exactly once. A failure to write the row is logged, never raised.
pub async fn log_run(pool: &SqlitePool, report: &RunReport) {
    let task = report.kind.task_name();
    let log = NewSyncLog {
        task_name: task,
        status: report.status,
        started_at: report.started_at,
        finished_at: report.finished_at,
        error_message: report.summary.as_deref(),
    };

    let inserted = match pool.acquire().await {
        Ok(mut conn) => sync_logs_db::insert_log(&mut conn, &log).await,
        Err(e) => Err(e),
    };
    if let Err(e) = inserted {
        error!(task, error = ?e, "Failed to record sync run");
    }

    let elapsed_secs = (report.finished_at - report.started_at).num_seconds();
    match report.status {
        SyncStatus::Success => info!(
            task,
            phase = %RunPhase::Logged,
            units = report.units,
            saved = report.saved,
            elapsed_secs,
            started_at = dates::rfc3339_utc(report.started_at),
            "Sync run succeeded"
        ),
        SyncStatus::Failed => warn!(
            task,
            phase = %RunPhase::Logged,
            units = report.units,
            failed = report.failed_units.len(),
            saved = report.saved,
            elapsed_secs,
            started_at = dates::rfc3339_utc(report.started_at),
            summary = ?report.summary,
            "Sync run failed"
        ),
    }
}
