//! Progress events and their SSE wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What happened. `Heartbeat` events are synthesized for idle subscribers
/// so HTTP intermediaries keep the stream open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Queued,
    Started,
    ChunkCreated,
    ChunkAnalyzed,
    ChunkEmbedded,
    ChunkStored,
    Progress,
    Completed,
    Failed,
    Cancelled,
    Heartbeat,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::Queued => "queued",
            ProgressKind::Started => "started",
            ProgressKind::ChunkCreated => "chunk_created",
            ProgressKind::ChunkAnalyzed => "chunk_analyzed",
            ProgressKind::ChunkEmbedded => "chunk_embedded",
            ProgressKind::ChunkStored => "chunk_stored",
            ProgressKind::Progress => "progress",
            ProgressKind::Completed => "completed",
            ProgressKind::Failed => "failed",
            ProgressKind::Cancelled => "cancelled",
            ProgressKind::Heartbeat => "heartbeat",
        }
    }

    /// Terminal kinds end the session's stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressKind::Completed | ProgressKind::Failed | ProgressKind::Cancelled
        )
    }
}

/// One ephemeral progress notification. Events are fan-out only — they
/// are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: Uuid,
    pub job_id: Option<Uuid>,
    pub kind: ProgressKind,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(session_id: Uuid, job_id: Option<Uuid>, kind: ProgressKind, payload: Value) -> Self {
        Self {
            session_id,
            job_id,
            kind,
            payload,
            ts: Utc::now(),
        }
    }

    pub fn heartbeat(session_id: Uuid) -> Self {
        Self::new(session_id, None, ProgressKind::Heartbeat, Value::Null)
    }

    /// `data: {"event": kind, "data": payload, "timestamp": iso8601}\n\n`
    pub fn to_sse_frame(&self) -> String {
        let body = serde_json::json!({
            "event": self.kind.as_str(),
            "data": self.payload,
            "timestamp": self.ts.to_rfc3339(),
        });
        format!("data: {body}\n\n")
    }
}
