use async_trait::async_trait;

use crate::scheduler::Job;
use crate::sync::run_report::JobKind;
use crate::sync::{hero_sync, stats_sync, SyncContext};

/// One of the two sync jobs bound to its own context.
pub struct SyncTask {
    kind: JobKind,
    ctx: SyncContext,
}

impl SyncTask {
    pub fn new(kind: JobKind, ctx: SyncContext) -> Self {
        Self { kind, ctx }
    }
}

#[async_trait]
impl Job for SyncTask {
    fn name(&self) -> &'static str {
        self.kind.task_name()
    }

    async fn run(&self) {
        match self.kind {
            JobKind::SyncHeroes => {
                hero_sync::sync_heroes(&self.ctx).await;
            }
            JobKind::SyncHeroStats => {
                stats_sync::sync_hero_stats(&self.ctx).await;
            }
        }
    }
}
