//! Queue row types and retry backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ResolvedIngestOptions;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
const BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Claimed => "claimed",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "queued" => JobStatus::Queued,
            "claimed" => JobStatus::Claimed,
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Url,
    File,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Url => "url",
            JobType::File => "file",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "url" => JobType::Url,
            "file" => JobType::File,
            _ => return None,
        })
    }
}

/// What to ingest: a URL, or an uploaded blob by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Url { url: String },
    File {
        filename: String,
        mime: String,
        bytes_ref: String,
    },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Url { .. } => JobType::Url,
            JobPayload::File { .. } => JobType::File,
        }
    }

    /// Human-readable source label for document titles and index names.
    pub fn source_label(&self) -> &str {
        match self {
            JobPayload::Url { url } => url,
            JobPayload::File { filename, .. } => filename,
        }
    }

    pub fn source_url(&self) -> Option<String> {
        match self {
            JobPayload::Url { url } => Some(url.clone()),
            JobPayload::File { .. } => None,
        }
    }
}

/// One durable queue entry.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub session_id: Uuid,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub options: ResolvedIngestOptions,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Retry delay for a job that has failed `attempt` times:
/// `min(5 min, 1s·2^attempt)` plus up to 10 % jitter.
pub fn retry_backoff(attempt: i32) -> Duration {
    let exp = Duration::from_secs(1).saturating_mul(2u32.saturating_pow(attempt.max(0) as u32));
    let capped = exp.min(BACKOFF_CAP);
    let jitter = rand::rng().random_range(0.0..0.1);
    capped.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wire_shape() {
        let payload = JobPayload::Url {
            url: "https://x/a".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "url");
        assert_eq!(json["url"], "https://x/a");

        let file = JobPayload::File {
            filename: "a.txt".into(),
            mime: "text/plain".into(),
            bytes_ref: "/tmp/blob-1".into(),
        };
        let back: JobPayload =
            serde_json::from_value(serde_json::to_value(&file).unwrap()).unwrap();
        assert_eq!(back, file);
        assert_eq!(back.job_type(), JobType::File);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = retry_backoff(0);
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1150));
        let third = retry_backoff(2);
        assert!(third >= Duration::from_secs(4) && third < Duration::from_millis(4500));
        assert!(retry_backoff(30) <= Duration::from_secs(330));
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Claimed,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }
}
