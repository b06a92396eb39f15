//! Service framework
//!
//! The lifecycle substrate every VeloBench service runs on: init/run/stop
//! hooks, status reporting on the bus, command handling for configure and
//! start, periodic heartbeats, and shutdown propagation through a
//! [`CancellationToken`] tree.

pub mod heartbeat;
pub mod runner;

pub use runner::{Service, ServiceContext, ServiceRunner};
