//! Worker pool
//!
//! N async workers consume credits, compose and send requests, parse
//! streaming responses with per-chunk receive timestamps, honor per-credit
//! cancellation deadlines, and emit raw request records. A worker runs one
//! request at a time; overall concurrency is governed by the scheduler's
//! gate. Multi-turn conversation history lives in the worker that served
//! the session's first turn, fed by a per-worker continuation lane.

pub mod executor;
pub mod pool;
pub mod worker;

pub use executor::{ExecOutcome, RequestExecutor};
pub use pool::WorkerPoolService;
pub use worker::WorkerDeps;
