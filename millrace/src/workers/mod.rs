//! Bounded-concurrency worker pool (see [`pool::WorkerPool`]).

pub mod pool;

pub use pool::{WorkerPool, WorkerPoolHandle};
