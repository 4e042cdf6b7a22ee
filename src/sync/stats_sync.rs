use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::overfast_api::ApiHeroStat;
use crate::database::hero_stats_db::{self, StatValues};
use crate::database::heroes_db;
use crate::sync::run_report::{self, JobKind, RunPhase, RunReport, RunTracker};
use crate::sync::stat_tasks::{build_stat_tasks, StatTask};
use crate::sync::{SyncContext, SyncError};
use crate::Error;

/// Refreshes win and pick rates for every region, game mode and division.
#[tracing::instrument(level = "info", skip_all, fields(task = JobKind::SyncHeroStats.task_name()))]
pub async fn sync_hero_stats(ctx: &SyncContext) -> RunReport {
    let mut tracker = RunTracker::start(JobKind::SyncHeroStats);

    let report = match run_tasks(ctx, &mut tracker).await {
        Ok(()) => tracker.aggregate(),
        Err(e) => {
            warn!(error = %e, "Hero stats sync aborted");
            tracker.aborted(&e.to_string())
        }
    };

    run_report::log_run(&ctx.pool, &report).await;
    report
}

async fn run_tasks(ctx: &SyncContext, tracker: &mut RunTracker) -> Result<(), Error> {
    let known_heroes = {
        let mut conn = ctx.pool.acquire().await?;
        heroes_db::query_hero_keys(&mut conn).await?
    };
    if known_heroes.is_empty() {
        warn!("No heroes stored yet, every stats row will be dropped");
    }

    let fetcher = ctx.fetcher();
    let tasks = build_stat_tasks(&ctx.settings.platform);
    info!(tasks = tasks.len(), heroes = known_heroes.len(), "Starting hero stats fan-out");

    for (index, task) in tasks.iter().enumerate() {
        tracker.enter(RunPhase::FetchingUnit(index));

        let outcome = match fetcher.fetch::<Vec<ApiHeroStat>>(&task.endpoint()).await {
            Ok(rows) => {
                if rows.is_empty() {
                    debug!(stat_task = %task.label(), "Upstream has no stats for this task");
                }
                let rows = retain_known_heroes(task, rows, &known_heroes);
                let mut conn = ctx.pool.acquire().await?;
                hero_stats_db::upsert_stats(&mut conn, &task.dimensions(), &rows, Utc::now())
                    .await
                    .map_err(SyncError::from)
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(saved) => tracker.unit_succeeded(index, saved),
            Err(e) => {
                warn!(
                    stat_task = %task.label(),
                    error = %e,
                    cooldown_secs = ctx.settings.failure_cooldown.as_secs(),
                    "Stats task failed, cooling down"
                );
                tracker.unit_failed(index, task.label());
                ctx.sleeper.sleep(ctx.settings.failure_cooldown).await;
            }
        }

        ctx.sleeper.sleep(ctx.settings.politeness_delay).await;
    }

    Ok(())
}

/// Drops rows for heroes missing from the snapshot; they would violate the
/// foreign key on `hero_stats`.
fn retain_known_heroes(
    task: &StatTask,
    rows: Vec<ApiHeroStat>,
    known_heroes: &HashSet<String>,
) -> Vec<(String, StatValues)> {
    let total = rows.len();
    let kept: Vec<(String, StatValues)> = rows
        .into_iter()
        .filter(|row| known_heroes.contains(&row.hero))
        .map(|row| {
            (
                row.hero,
                StatValues {
                    winrate: row.winrate,
                    pickrate: row.pickrate,
                },
            )
        })
        .collect();

    if kept.len() < total {
        debug!(
            stat_task = %task.label(),
            dropped = total - kept.len(),
            "Dropped stats rows for unknown heroes"
        );
    }
    kept
}
