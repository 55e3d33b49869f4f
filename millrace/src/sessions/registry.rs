use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::errors::{PipelineError, db_err};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Queued => "queued",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "queued" => SessionStatus::Queued,
            "processing" => SessionStatus::Processing,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            "cancelled" => SessionStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// The runtime shadow of one ingestion.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub job_id: Option<Uuid>,
    pub document_id: Option<Uuid>,
    pub status: SessionStatus,
    pub url: Option<String>,
    pub processed_chunks: i32,
    pub total_chunks: Option<i32>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    pool: PgPool,
    /// In-process cancellation flags; source of truth stays durable, this
    /// is the fast path the pipeline polls between chunks.
    flags: RwLock<FxHashMap<Uuid, Arc<AtomicBool>>>,
}

impl SessionRegistry {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            flags: RwLock::new(FxHashMap::default()),
        })
    }

    /// The in-memory cancellation flag for a session.
    pub fn cancel_flag(&self, session_id: Uuid) -> Arc<AtomicBool> {
        if let Some(flag) = self.flags.read().get(&session_id) {
            return Arc::clone(flag);
        }
        let mut flags = self.flags.write();
        Arc::clone(
            flags
                .entry(session_id)
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    /// Set both the durable and in-memory cancellation flags.
    #[instrument(skip(self), err)]
    pub async fn request_cancel(&self, session_id: Uuid) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE upload_sessions SET cancel_requested = TRUE, updated_at = now() WHERE session_id = $1",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.cancel_flag(session_id).store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Heartbeat the session and refresh the in-memory cancel flag from
    /// the durable one (external cancellations arrive this way).
    #[instrument(skip(self), err)]
    pub async fn heartbeat(&self, session_id: Uuid) -> Result<bool, PipelineError> {
        let cancel_requested: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE upload_sessions
            SET last_heartbeat = now(), updated_at = now()
            WHERE session_id = $1
            RETURNING cancel_requested
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let cancelled = cancel_requested.unwrap_or(false);
        if cancelled {
            self.cancel_flag(session_id).store(true, Ordering::SeqCst);
        }
        Ok(cancelled)
    }

    /// Attach the document created for this session.
    pub async fn set_document(
        &self,
        session_id: Uuid,
        document_id: Uuid,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            "UPDATE upload_sessions SET document_id = $2, updated_at = now() WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Progress counters, updated as chunks land.
    pub async fn update_progress(
        &self,
        session_id: Uuid,
        processed_chunks: i32,
        total_chunks: Option<i32>,
    ) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET processed_chunks = $2,
                total_chunks = COALESCE($3, total_chunks),
                updated_at = now()
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(processed_chunks)
        .bind(total_chunks)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Terminal transition; clears the in-memory flag entry.
    #[instrument(skip(self), err)]
    pub async fn finish(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), PipelineError> {
        debug_assert!(status.is_terminal());
        sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = $2, error = $3, updated_at = now()
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.flags.write().remove(&session_id);
        Ok(())
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<SessionRecord>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, job_id, document_id, status, url, processed_chunks,
                   total_chunks, error, cancel_requested, last_heartbeat,
                   created_at, updated_at
            FROM upload_sessions WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// Sessions currently queued or processing, for the in-progress
    /// surface.
    #[instrument(skip(self), err)]
    pub async fn list_active(&self) -> Result<Vec<SessionRecord>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, job_id, document_id, status, url, processed_chunks,
                   total_chunks, error, cancel_requested, last_heartbeat,
                   created_at, updated_at
            FROM upload_sessions
            WHERE status IN ('queued', 'processing')
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(record_from_row).collect()
    }

    /// Reap sessions whose heartbeat is older than `heartbeat_timeout`:
    /// `processing → failed (heartbeat_timeout)`. Returns how many were
    /// reaped. Run at startup and periodically.
    #[instrument(skip(self), err)]
    pub async fn sweep_stale(
        &self,
        heartbeat_timeout: Duration,
    ) -> Result<u64, PipelineError> {
        let cutoff = format!("{} seconds", heartbeat_timeout.as_secs());
        let reaped = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'failed', error = 'heartbeat_timeout', updated_at = now()
            WHERE status = 'processing' AND last_heartbeat < now() - $1::interval
            "#,
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if reaped > 0 {
            tracing::warn!(
                target: "millrace::sessions",
                reaped,
                "stale sessions transitioned to failed"
            );
        }
        Ok(reaped)
    }

    /// Backstop for sessions that keep heartbeating but stopped making
    /// any durable progress: `processing` rows untouched for longer than
    /// `session_timeout` (default 8 min) fail with `session_timeout`.
    #[instrument(skip(self), err)]
    pub async fn sweep_stuck(&self, session_timeout: Duration) -> Result<u64, PipelineError> {
        let cutoff = format!("{} seconds", session_timeout.as_secs());
        let reaped = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'failed', error = 'session_timeout', updated_at = now()
            WHERE status = 'processing' AND updated_at < now() - $1::interval
            "#,
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if reaped > 0 {
            tracing::warn!(
                target: "millrace::sessions",
                reaped,
                "stuck sessions transitioned to failed"
            );
        }
        Ok(reaped)
    }
}

fn record_from_row(row: &PgRow) -> Result<SessionRecord, PipelineError> {
    let status_raw: String = row.get("status");
    let status = SessionStatus::parse(&status_raw).ok_or_else(|| {
        PipelineError::FatalDatabase(format!("unknown session status '{status_raw}'"))
    })?;
    Ok(SessionRecord {
        session_id: row.get("session_id"),
        job_id: row.get("job_id"),
        document_id: row.get("document_id"),
        status,
        url: row.get("url"),
        processed_chunks: row.get("processed_chunks"),
        total_chunks: row.get("total_chunks"),
        error: row.get("error"),
        cancel_requested: row.get("cancel_requested"),
        last_heartbeat: row.get::<DateTime<Utc>, _>("last_heartbeat"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_roundtrip() {
        for status in [
            SessionStatus::Queued,
            SessionStatus::Processing,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert!(SessionStatus::Failed.is_terminal());
        assert!(!SessionStatus::Processing.is_terminal());
    }
}
