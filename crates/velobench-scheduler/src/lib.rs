//! Credit scheduler
//!
//! Translates the traffic spec into a stream of credits. Three modes:
//! fixed concurrency (gate on outstanding sessions), request rate with
//! constant or Poisson inter-arrivals (sleep-then-gate, no catch-up), and
//! fixed-schedule trace replay. Injects per-credit cancellation marks, tags
//! the warmup quota, and issues follow-up turn credits for multi-turn
//! sessions on sealed-record notices.

pub mod intervals;
pub mod scheduler;

pub use intervals::IntervalGenerator;
pub use scheduler::{should_cancel_credit, SchedulerService, SchedulerState};
