//! Pipeline-wide error taxonomy and the client-facing envelope.

use std::time::Duration;

use chrono::Utc;
use miette::Diagnostic;
use millstone::CorpusError;
use serde::Serialize;
use thiserror::Error;

/// Every failure in the substrate maps onto one of these kinds; the kind
/// decides retriability and the HTTP status the boundary should answer
/// with.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    #[diagnostic(code(millrace::invalid_input))]
    InvalidInput(String),

    #[error("not found: {0}")]
    #[diagnostic(code(millrace::not_found))]
    NotFound(String),

    #[error("authentication required: {0}")]
    #[diagnostic(code(millrace::auth_required))]
    AuthRequired(String),

    #[error("rate limited: {message}")]
    #[diagnostic(code(millrace::rate_limited))]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("upstream unavailable: {0}")]
    #[diagnostic(
        code(millrace::upstream),
        help("LLM, vector, or lexical service is unreachable; the job will be retried.")
    )]
    UpstreamUnavailable(String),

    #[error("transient database error: {0}")]
    #[diagnostic(code(millrace::db_transient))]
    TransientDatabase(String),

    #[error("database error: {0}")]
    #[diagnostic(code(millrace::db_fatal))]
    FatalDatabase(String),

    #[error("job exceeded its processing deadline")]
    #[diagnostic(
        code(millrace::job_timeout),
        help("The per-job soft timeout is max(5 min, 2s per chunk).")
    )]
    JobTimeout,

    #[error("cancelled")]
    #[diagnostic(code(millrace::cancelled))]
    Cancelled,
}

impl PipelineError {
    /// Stable kind tag used in wire responses and job error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::AuthRequired(_) => "auth_required",
            PipelineError::RateLimited { .. } => "rate_limited",
            PipelineError::UpstreamUnavailable(_) => "upstream_unavailable",
            PipelineError::TransientDatabase(_) => "transient_database",
            PipelineError::FatalDatabase(_) => "fatal_database",
            PipelineError::JobTimeout => "job_timeout",
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// Whether the queue should schedule another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::RateLimited { .. }
                | PipelineError::UpstreamUnavailable(_)
                | PipelineError::TransientDatabase(_)
        )
    }

    /// HTTP status the boundary should map this to.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::InvalidInput(_) => 400,
            PipelineError::NotFound(_) => 404,
            PipelineError::AuthRequired(_) => 401,
            PipelineError::RateLimited { .. } => 429,
            PipelineError::Cancelled => 409,
            PipelineError::JobTimeout => 504,
            _ => 502,
        }
    }

    /// Serializable `{success:false, error:{…}, timestamp}` response body.
    pub fn envelope(&self) -> ErrorEnvelope {
        let hint = match self {
            PipelineError::RateLimited {
                retry_after: Some(delay),
                ..
            } => Some(format!("retry after {}s", delay.as_secs())),
            PipelineError::InvalidInput(_) => {
                Some("check the request parameters and try again".to_string())
            }
            _ => None,
        };
        ErrorEnvelope {
            success: false,
            error: ErrorBody {
                kind: self.kind().to_string(),
                message: self.to_string(),
                hint,
            },
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl From<CorpusError> for PipelineError {
    fn from(err: CorpusError) -> Self {
        match err {
            CorpusError::InvalidInput(m) => PipelineError::InvalidInput(m),
            CorpusError::NotFound(m) => PipelineError::NotFound(m),
            CorpusError::RateLimited {
                message,
                retry_after,
            } => PipelineError::RateLimited {
                message,
                retry_after,
            },
            CorpusError::Upstream(m) => PipelineError::UpstreamUnavailable(m),
            CorpusError::TransientDatabase(m) => PipelineError::TransientDatabase(m),
            CorpusError::FatalDatabase(m) => PipelineError::FatalDatabase(m),
            CorpusError::Serde(e) => PipelineError::FatalDatabase(e.to_string()),
            CorpusError::Cancelled => PipelineError::Cancelled,
            CorpusError::AnalysisFailed { .. } | CorpusError::EmbeddingFailed(_) => {
                PipelineError::UpstreamUnavailable(err.to_string())
            }
        }
    }
}

/// Map a raw sqlx failure through the shared transient/fatal classifier.
pub fn db_err(err: sqlx::Error) -> PipelineError {
    millstone::error::classify_sqlx(err).into()
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// The uniform user-facing failure shape.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_follows_the_taxonomy() {
        assert!(PipelineError::UpstreamUnavailable("x".into()).is_retriable());
        assert!(PipelineError::TransientDatabase("x".into()).is_retriable());
        assert!(
            PipelineError::RateLimited {
                message: "x".into(),
                retry_after: None
            }
            .is_retriable()
        );
        assert!(!PipelineError::InvalidInput("x".into()).is_retriable());
        assert!(!PipelineError::FatalDatabase("x".into()).is_retriable());
        assert!(!PipelineError::Cancelled.is_retriable());
        assert!(!PipelineError::JobTimeout.is_retriable());
    }

    #[test]
    fn envelope_shape() {
        let envelope = PipelineError::InvalidInput("bad overlap".into()).envelope();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "invalid_input");
        assert!(json["error"]["hint"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn corpus_errors_map_onto_the_taxonomy() {
        let err: PipelineError = CorpusError::AnalysisFailed {
            attempts: 3,
            message: "gone".into(),
        }
        .into();
        assert_eq!(err.kind(), "upstream_unavailable");

        let err: PipelineError = CorpusError::Cancelled.into();
        assert_eq!(err.kind(), "cancelled");
    }

    #[test]
    fn http_statuses() {
        assert_eq!(PipelineError::InvalidInput("x".into()).http_status(), 400);
        assert_eq!(PipelineError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            PipelineError::RateLimited {
                message: "x".into(),
                retry_after: None
            }
            .http_status(),
            429
        );
    }
}
