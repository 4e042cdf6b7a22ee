pub mod hero_sync;
pub mod run_report;
pub mod stat_tasks;
pub mod stats_sync;

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::api::fetcher::{BackoffFetcher, FetchError, RetryPolicy};
use crate::api::overfast_api::Upstream;
use crate::config::AppConfig;
use crate::database::types::MapperError;
use crate::util::sleeper::Sleeper;

/// Why a single unit (one hero, one stats task) failed. Never escapes a job.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("{what} returned no usable data")]
    EmptyPayload { what: String },
    #[error(transparent)]
    Mapping(#[from] MapperError),
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub locale: Option<String>,
    pub platform: String,
    pub politeness_delay: Duration,
    pub failure_cooldown: Duration,
    pub retry: RetryPolicy,
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            locale: config.upstream.locale.clone(),
            platform: config.upstream.platform.clone(),
            politeness_delay: Duration::from_secs(config.scheduler.politeness_delay_secs),
            failure_cooldown: Duration::from_secs(config.scheduler.failure_cooldown_secs),
            retry: RetryPolicy {
                max_attempts: config.upstream.max_attempts,
                retry_after_margin: Duration::from_secs(config.upstream.retry_after_margin_secs),
            },
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            locale: Some("ko-kr".to_string()),
            platform: "pc".to_string(),
            politeness_delay: Duration::from_secs(15),
            failure_cooldown: Duration::from_secs(45),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a job body needs. Each job gets its own context so the two
/// never share an upstream client.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: SqlitePool,
    pub upstream: Arc<dyn Upstream>,
    pub sleeper: Arc<dyn Sleeper>,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn fetcher(&self) -> BackoffFetcher<'_> {
        BackoffFetcher::new(self.upstream.as_ref(), self.sleeper.as_ref(), self.settings.retry)
    }
}
