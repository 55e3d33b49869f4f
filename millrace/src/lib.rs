//! # Millrace: the ingestion pipeline's concurrency substrate
//!
//! Millrace drives documents through the corpus layer (`millstone`) with
//! durable, crash-recoverable machinery:
//!
//! - **Job queue** — FIFO+priority over Postgres with skip-locked claims,
//!   retry scheduling, cancellation, and a crash sweep.
//! - **Session registry** — the durable record of what is running now,
//!   heartbeats included; stale sessions are reaped.
//! - **Worker pool** — bounded concurrency, graceful drain on shutdown.
//! - **Orchestrator** — fetch → chunk → enrich → triple-store per job,
//!   with cancellation checkpoints and a failure budget.
//! - **Progress hub** — per-session pub/sub with bounded buffers and
//!   SSE-ready framing; slow subscribers are dropped, never waited on.
//!
//! ```text
//! enqueue ─► background_jobs ─► WorkerPool ─► Orchestrator
//!                 │                               │
//!          upload_sessions ◄── heartbeats ────────┤
//!                                                 ▼
//!                               chunker → enricher → StoreFanout
//!                                                 │
//!                    ProgressHub ◄── events ──────┘
//! ```
//!
//! The HTTP surface, format extraction, and chat composition live outside
//! this crate; §-level request/option types and the SSE wire format are
//! provided for those boundaries to consume.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod errors;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod sessions;
pub mod telemetry;
pub mod workers;

pub use config::{IngestOptions, PipelineConfig, ResolvedIngestOptions};
pub use errors::{ErrorEnvelope, PipelineError};
pub use pipeline::{ContentFetcher, FetchedContent, JobOutcome, Orchestrator, PipelineDeps};
pub use progress::{ProgressEvent, ProgressHub, ProgressKind, ProgressStream};
pub use queue::{Job, JobPayload, JobQueue, JobStatus, JobType};
pub use sessions::{SessionRecord, SessionRegistry};
pub use workers::WorkerPool;
