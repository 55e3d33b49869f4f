//! Durable FIFO+priority job queue with claim/retry/cancel (see
//! [`durable::JobQueue`]).
//!
//! Invariants:
//! - exactly one worker holds `claimed|running` for a job at any moment
//!   (enforced by the skip-locked claim);
//! - a running job always has a live session row, created in the same
//!   transaction as the job;
//! - after a crash, one sweep pass converges every stale claim back to
//!   `queued` or `failed`.

pub mod durable;
pub mod job;

pub use durable::{CancelOutcome, JobPage, JobQuery, JobQueue};
pub use job::{DEFAULT_MAX_ATTEMPTS, Job, JobPayload, JobStatus, JobType, retry_backoff};
