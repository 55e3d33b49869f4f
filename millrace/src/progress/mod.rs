//! Progress broadcasting: events, topic hub, SSE framing.
//!
//! The orchestrator publishes; HTTP subscribers (and dashboards via the
//! wildcard) consume. Events are ephemeral, buffers are bounded, and a
//! slow consumer can never apply backpressure to the pipeline.

pub mod event;
pub mod hub;

pub use event::{ProgressEvent, ProgressKind};
pub use hub::{DEFAULT_BUFFER_CAPACITY, IDLE_HEARTBEAT, ProgressHub, ProgressHubMetrics, ProgressStream};
