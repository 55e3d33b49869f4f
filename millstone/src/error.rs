use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Errors produced by the corpus layer (chunking, enrichment, storage,
/// retrieval).
///
/// Variants map onto the pipeline-wide taxonomy: `InvalidInput` is
/// client-visible, `RateLimited`/`Upstream`/`TransientDatabase` are
/// retriable, `FatalDatabase` and the enrichment terminal failures are not.
#[derive(Debug, Error, Diagnostic)]
pub enum CorpusError {
    #[error("invalid input: {0}")]
    #[diagnostic(
        code(millstone::invalid_input),
        help("Check chunk size/overlap bounds and that the document is non-empty.")
    )]
    InvalidInput(String),

    #[error("not found: {0}")]
    #[diagnostic(code(millstone::not_found))]
    NotFound(String),

    #[error("chunk analysis failed after {attempts} attempts: {message}")]
    #[diagnostic(
        code(millstone::analysis_failed),
        help("The LLM rejected or mangled the analysis request repeatedly; see the inner message.")
    )]
    AnalysisFailed { attempts: u32, message: String },

    #[error("embedding failed: {0}")]
    #[diagnostic(
        code(millstone::embedding_failed),
        help("Verify EMBEDDING_DIMENSIONS matches the configured model output.")
    )]
    EmbeddingFailed(String),

    #[error("rate limited by upstream: {message}")]
    #[diagnostic(code(millstone::rate_limited))]
    RateLimited {
        message: String,
        /// Server-supplied hint, when the upstream sent a Retry-After.
        retry_after: Option<Duration>,
    },

    #[error("upstream unavailable: {0}")]
    #[diagnostic(code(millstone::upstream))]
    Upstream(String),

    #[error("transient database error: {0}")]
    #[diagnostic(code(millstone::db_transient))]
    TransientDatabase(String),

    #[error("database error: {0}")]
    #[diagnostic(
        code(millstone::db_fatal),
        help("Non-retriable database failure; inspect the relational store schema and connectivity.")
    )]
    FatalDatabase(String),

    #[error("serialization error: {0}")]
    #[diagnostic(code(millstone::serde))]
    Serde(#[from] serde_json::Error),

    #[error("operation cancelled")]
    #[diagnostic(code(millstone::cancelled))]
    Cancelled,
}

impl CorpusError {
    /// Whether a local retry with backoff is worthwhile.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CorpusError::RateLimited { .. }
                | CorpusError::Upstream(_)
                | CorpusError::TransientDatabase(_)
        )
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        CorpusError::Upstream(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        CorpusError::InvalidInput(message.into())
    }
}

/// Classify a sqlx failure into transient vs fatal.
///
/// Connection-level problems (pool exhaustion, dropped sockets) are worth a
/// retry; constraint violations and schema drift are not.
pub fn classify_sqlx(err: sqlx::Error) -> CorpusError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => CorpusError::TransientDatabase(err.to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
            CorpusError::FatalDatabase(err.to_string())
        }
        _ => CorpusError::FatalDatabase(err.to_string()),
    }
}

/// Classify a reqwest failure against an upstream HTTP service.
pub fn classify_http(service: &str, err: reqwest::Error) -> CorpusError {
    if err.is_timeout() || err.is_connect() {
        CorpusError::Upstream(format!("{service}: {err}"))
    } else if let Some(status) = err.status() {
        if status.as_u16() == 429 {
            CorpusError::RateLimited {
                message: format!("{service}: {err}"),
                retry_after: None,
            }
        } else if status.is_server_error() {
            CorpusError::Upstream(format!("{service}: {err}"))
        } else {
            CorpusError::InvalidInput(format!("{service}: {err}"))
        }
    } else {
        CorpusError::Upstream(format!("{service}: {err}"))
    }
}
