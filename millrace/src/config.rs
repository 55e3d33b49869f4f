//! Process configuration and per-request option merging.
//!
//! Environment variables resolve once into a [`PipelineConfig`]; every
//! request may override the recognized chunking/enrichment knobs via
//! [`IngestOptions`], validated at the boundary before anything is
//! enqueued.

use std::time::Duration;

use millstone::chunker::{ChunkerOptions, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use millstone::model::DocumentKind;
use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub bm25_url: String,
    pub embedding_dimensions: usize,
    pub worker_count: usize,
    pub chunk_parallelism: usize,
    /// Worker heartbeat cadence (H).
    pub heartbeat_interval: Duration,
    /// Staleness threshold for the sweep (T_heartbeat).
    pub heartbeat_timeout: Duration,
    /// Total-session cap (T_session); also the job soft-timeout floor.
    pub session_timeout: Duration,
    /// Sustained LLM calls per second across the whole process.
    pub llm_rate_per_sec: f64,
    pub default_chunk_size: usize,
    pub default_overlap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            openai_api_key: String::new(),
            openai_base_url: None,
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            bm25_url: "http://localhost:3002".to_string(),
            embedding_dimensions: 1536,
            worker_count: 4,
            chunk_parallelism: 3,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            session_timeout: Duration::from_secs(480),
            llm_rate_per_sec: 5.0,
            default_chunk_size: 2000,
            default_overlap: 200,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl PipelineConfig {
    /// Resolve from the environment (a `.env` file is honored when
    /// present). `DATABASE_URL` and `OPENAI_API_KEY` are required.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| PipelineError::InvalidInput("DATABASE_URL is required".into()))?;
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PipelineError::InvalidInput("OPENAI_API_KEY is required".into()))?;

        Ok(Self {
            database_url,
            openai_api_key,
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            qdrant_url: std::env::var("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_api_key: std::env::var("QDRANT_API_KEY").ok().filter(|k| !k.is_empty()),
            bm25_url: std::env::var("BM25_URL").unwrap_or(defaults.bm25_url),
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS")
                .unwrap_or(defaults.embedding_dimensions),
            worker_count: env_parse::<usize>("WORKER_COUNT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_count),
            chunk_parallelism: env_parse::<usize>("CHUNK_PARALLELISM")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.chunk_parallelism),
            heartbeat_interval: defaults.heartbeat_interval,
            heartbeat_timeout: env_parse::<u64>("SESSION_HEARTBEAT_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_timeout),
            session_timeout: env_parse::<u64>("SESSION_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_timeout),
            llm_rate_per_sec: env_parse("LLM_RATE_PER_SEC").unwrap_or(defaults.llm_rate_per_sec),
            default_chunk_size: defaults.default_chunk_size,
            default_overlap: defaults.default_overlap,
        })
    }

    /// Per-job soft deadline: `max(5 min, 2s · total_chunks)`, never below
    /// the configured session cap's floor.
    pub fn job_deadline(&self, total_chunks: usize) -> Duration {
        Duration::from_secs(300).max(Duration::from_secs(2 * total_chunks as u64))
    }
}

/// The recognized per-request options, exactly as the HTTP boundary
/// receives them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IngestOptions {
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub enable_contextual_embeddings: Option<bool>,
    pub enable_intelligent: Option<bool>,
    pub document_type: Option<String>,
    pub priority: Option<i32>,
}

/// Options after validation and merging over process defaults; this is
/// what a job carries in its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIngestOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub contextual_embeddings: bool,
    pub intelligent: bool,
    pub document_type: Option<DocumentKind>,
    pub priority: i32,
}

impl Default for ResolvedIngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            overlap: 200,
            contextual_embeddings: true,
            intelligent: true,
            document_type: None,
            priority: 100,
        }
    }
}

impl ResolvedIngestOptions {
    pub fn chunker_options(&self) -> ChunkerOptions {
        ChunkerOptions {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            enable_adaptive: true,
            enable_intelligent: self.intelligent,
            document_type: self.document_type,
        }
    }
}

impl IngestOptions {
    /// Validate and merge over process defaults. Rejections here are the
    /// client-visible 400s; nothing invalid reaches the queue.
    pub fn resolve(&self, config: &PipelineConfig) -> Result<ResolvedIngestOptions, PipelineError> {
        let chunk_size = self.chunk_size.unwrap_or(config.default_chunk_size);
        let overlap = self.overlap.unwrap_or(config.default_overlap);

        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(PipelineError::InvalidInput(format!(
                "chunkSize {chunk_size} outside [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]"
            )));
        }
        if overlap >= chunk_size {
            return Err(PipelineError::InvalidInput(format!(
                "overlap {overlap} must be smaller than chunkSize {chunk_size}"
            )));
        }
        let document_type = match self.document_type.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(DocumentKind::parse(raw).ok_or_else(|| {
                PipelineError::InvalidInput(format!("unknown documentType '{raw}'"))
            })?),
        };

        Ok(ResolvedIngestOptions {
            chunk_size,
            overlap,
            contextual_embeddings: self.enable_contextual_embeddings.unwrap_or(true),
            intelligent: self.enable_intelligent.unwrap_or(true),
            document_type,
            priority: self.priority.unwrap_or(100),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_merge_cleanly() {
        let config = PipelineConfig::default();
        let resolved = IngestOptions::default().resolve(&config).unwrap();
        assert_eq!(resolved, ResolvedIngestOptions::default());
    }

    #[test]
    fn overrides_take_effect() {
        let config = PipelineConfig::default();
        let options = IngestOptions {
            chunk_size: Some(3000),
            overlap: Some(150),
            enable_contextual_embeddings: Some(false),
            document_type: Some("academic_paper".into()),
            priority: Some(5),
            ..Default::default()
        };
        let resolved = options.resolve(&config).unwrap();
        assert_eq!(resolved.chunk_size, 3000);
        assert_eq!(resolved.overlap, 150);
        assert!(!resolved.contextual_embeddings);
        assert_eq!(resolved.document_type, Some(DocumentKind::AcademicPaper));
        assert_eq!(resolved.priority, 5);
    }

    #[test]
    fn boundary_validation_rejects_bad_options() {
        let config = PipelineConfig::default();
        let overlap_too_big = IngestOptions {
            chunk_size: Some(200),
            overlap: Some(200),
            ..Default::default()
        };
        assert!(overlap_too_big.resolve(&config).is_err());

        let bad_type = IngestOptions {
            document_type: Some("novella".into()),
            ..Default::default()
        };
        assert!(bad_type.resolve(&config).is_err());

        let tiny = IngestOptions {
            chunk_size: Some(10),
            ..Default::default()
        };
        assert!(tiny.resolve(&config).is_err());
    }

    #[test]
    fn job_deadline_scales_with_chunk_count() {
        let config = PipelineConfig::default();
        assert_eq!(config.job_deadline(3), Duration::from_secs(300));
        assert_eq!(config.job_deadline(500), Duration::from_secs(1000));
    }

    #[test]
    fn request_options_accept_camel_case_wire_shape() {
        let raw = r#"{"chunkSize": 1500, "enableContextualEmbeddings": false}"#;
        let options: IngestOptions = serde_json::from_str(raw).unwrap();
        assert_eq!(options.chunk_size, Some(1500));
        assert_eq!(options.enable_contextual_embeddings, Some(false));
        assert!(serde_json::from_str::<IngestOptions>(r#"{"bogus": 1}"#).is_err());
    }
}
