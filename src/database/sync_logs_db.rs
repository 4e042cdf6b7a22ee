use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::database::types::SyncStatus;

#[derive(Debug, Clone, FromRow)]
pub struct SyncLog {
    pub log_id: i64,
    pub task_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSyncLog<'a> {
    pub task_name: &'a str,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error_message: Option<&'a str>,
}

/// Append-only; rows are never updated after insert.
pub async fn insert_log(
    conn: &mut SqliteConnection,
    log: &NewSyncLog<'_>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
            INSERT INTO sync_logs (task_name, status, started_at, finished_at, error_message)
            VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(log.task_name)
    .bind(log.status.as_str())
    .bind(log.started_at)
    .bind(log.finished_at)
    .bind(log.error_message)
    .execute(conn)
    .await?;

    let log_id = result.last_insert_rowid();
    debug!(log_id, task = log.task_name, status = %log.status, "Inserted sync log");
    Ok(log_id)
}

pub async fn query_recent_logs(
    conn: &mut SqliteConnection,
    task_name: &str,
    limit: i64,
) -> Result<Vec<SyncLog>, sqlx::Error> {
    let rows: Vec<SyncLog> = sqlx::query_as(
        r#"
            SELECT log_id, task_name, status, started_at, finished_at, error_message
            FROM sync_logs
            WHERE task_name = ?
            ORDER BY log_id DESC
            LIMIT ?
        "#,
    )
    .bind(task_name)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(rows)
}
