use std::path::Path;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::database::{heroes_db, sync_logs_db};
use crate::sync::run_report::JobKind;
use crate::Error;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_database(path: &Path) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| format!("Could not open database {}: {e}", path.display()))?;

    MIGRATOR.run(&pool).await?;
    info!(path = %path.display(), "Database initialised and migrated");

    Ok(pool)
}

/// Logs what the store currently holds so a restart shows where the last runs left off.
pub async fn log_store_summary(pool: &SqlitePool) -> Result<(), Error> {
    let mut conn = pool.acquire().await?;
    let heroes = heroes_db::query_heroes(&mut conn, None).await?;
    info!(hero_count = heroes.len(), "Heroes currently stored");

    for kind in JobKind::ALL {
        match sync_logs_db::query_recent_logs(&mut conn, kind.task_name(), 1).await?.first() {
            Some(last) => info!(
                task = %last.task_name,
                status = %last.status,
                started_at = %last.started_at,
                finished_at = %last.finished_at,
                error = ?last.error_message,
                "Last recorded sync run"
            ),
            None => info!(task = kind.task_name(), "No sync run recorded yet"),
        }
    }

    Ok(())
}

/// Single-connection in-memory database; every connection to `:memory:` is a fresh database.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_and_migrates_a_new_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oowsync.db");

        let pool = init_database(&path).await.unwrap();
        assert!(path.exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            r#"
                SELECT name FROM sqlite_master
                WHERE type = 'table' AND name NOT LIKE '\_%' ESCAPE '\'
                ORDER BY name
            "#,
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for expected in ["hero_abilities", "hero_stats", "heroes", "sync_logs"] {
            assert!(names.contains(&expected), "missing table {expected}");
        }

        log_store_summary(&pool).await.unwrap();
        pool.close().await;

        let reopened = init_database(&path).await.unwrap();
        reopened.close().await;
    }
}
