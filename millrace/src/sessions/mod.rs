//! Session registry: the durable record of what is running now.
//!
//! Rows live in `upload_sessions`; an in-memory flag map gives the
//! orchestrator a cheap cancellation check between chunks, refreshed from
//! the durable `cancel_requested` column on every heartbeat. The sweep
//! reaps sessions whose heartbeat went stale, so a restarted process
//! converges to a clean registry within one pass.

pub mod registry;

pub use registry::{SessionRecord, SessionRegistry, SessionStatus};
