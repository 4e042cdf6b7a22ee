use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::api::fetcher::BackoffFetcher;
use crate::api::overfast_api::{ApiHeroDetail, ApiHeroSummary, Endpoint};
use crate::database::{hero_abilities_db, heroes_db};
use crate::sync::run_report::{self, JobKind, RunPhase, RunReport, RunTracker};
use crate::sync::{SyncContext, SyncError};
use crate::Error;

/// Refreshes every hero on the roster together with its abilities.
#[tracing::instrument(level = "info", skip_all, fields(task = JobKind::SyncHeroes.task_name()))]
pub async fn sync_heroes(ctx: &SyncContext) -> RunReport {
    let mut tracker = RunTracker::start(JobKind::SyncHeroes);
    let fetcher = ctx.fetcher();

    tracker.enter(RunPhase::FetchingRoster);
    let roster_endpoint = Endpoint::Heroes {
        locale: ctx.settings.locale.clone(),
    };
    let roster = fetcher
        .fetch::<Vec<ApiHeroSummary>>(&roster_endpoint)
        .await
        .map(trim_keys);
    let report = match roster {
        Ok(roster) if roster.is_empty() => {
            warn!("Upstream returned an empty hero roster");
            tracker.roster_failed("upstream returned an empty hero list")
        }
        Ok(roster) => {
            info!(heroes = roster.len(), "Fetched hero roster");
            match sync_roster(ctx, &fetcher, &roster, &mut tracker).await {
                Ok(()) => tracker.aggregate(),
                Err(e) => {
                    warn!(error = %e, "Hero sync aborted");
                    tracker.aborted(&e.to_string())
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Hero roster fetch failed");
            tracker.roster_failed(&e.to_string())
        }
    };

    run_report::log_run(&ctx.pool, &report).await;
    report
}

/// Keys are trimmed once here so the detail request, the stored row and the
/// failed-unit label all use the same key.
fn trim_keys(roster: Vec<ApiHeroSummary>) -> Vec<ApiHeroSummary> {
    roster
        .into_iter()
        .map(|mut hero| {
            if hero.key.trim().len() != hero.key.len() {
                hero.key = hero.key.trim().to_string();
            }
            hero
        })
        .collect()
}

/// Only errors outside a single hero are returned; per-hero failures are
/// recorded on the tracker.
async fn sync_roster(
    ctx: &SyncContext,
    fetcher: &BackoffFetcher<'_>,
    roster: &[ApiHeroSummary],
    tracker: &mut RunTracker,
) -> Result<(), Error> {
    for (index, summary) in roster.iter().enumerate() {
        tracker.enter(RunPhase::FetchingUnit(index));

        let outcome = match fetch_detail(ctx, fetcher, summary).await {
            Ok(detail) => {
                let mut conn = ctx.pool.acquire().await?;
                persist_hero(&mut conn, summary, &detail).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(saved) => tracker.unit_succeeded(index, saved),
            Err(e) => {
                warn!(
                    hero_key = %summary.key,
                    error = %e,
                    "Hero sync failed, continuing with next hero"
                );
                tracker.unit_failed(index, summary.key.clone());
            }
        }

        ctx.sleeper.sleep(ctx.settings.politeness_delay).await;
    }

    Ok(())
}

async fn fetch_detail(
    ctx: &SyncContext,
    fetcher: &BackoffFetcher<'_>,
    summary: &ApiHeroSummary,
) -> Result<ApiHeroDetail, SyncError> {
    let endpoint = Endpoint::HeroDetail {
        hero_key: summary.key.clone(),
        locale: ctx.settings.locale.clone(),
    };
    let detail: ApiHeroDetail = fetcher.fetch(&endpoint).await?;

    if detail.is_empty() {
        return Err(SyncError::EmptyPayload {
            what: endpoint.to_string(),
        });
    }
    Ok(detail)
}

/// Returns the number of rows written: the hero plus its abilities.
async fn persist_hero(
    conn: &mut SqliteConnection,
    summary: &ApiHeroSummary,
    detail: &ApiHeroDetail,
) -> Result<usize, SyncError> {
    let hero = heroes_db::map_to_hero(summary, detail, Utc::now())?;
    heroes_db::upsert_hero(&mut *conn, &hero).await?;

    let abilities = hero_abilities_db::map_to_abilities(&hero.key, detail);
    let written = hero_abilities_db::upsert_abilities(&mut *conn, &hero.key, &abilities).await?;

    Ok(1 + written)
}
