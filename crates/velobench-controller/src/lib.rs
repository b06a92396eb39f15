//! Controller
//!
//! Brings up the service topology, drives the run phase machine
//! (INIT → READY → WARMUP → PROFILING → COOLDOWN → FINALIZING → DONE),
//! monitors heartbeats, and shuts everything down — cleanly after drain,
//! forcibly after the grace period, immediately on a service failure.

pub mod controller;
pub mod runner;

pub use controller::{Controller, ControllerSettings, RunOutcome};
pub use runner::{run_profile, RunSummary};
