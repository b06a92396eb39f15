//! VeloBench message bus
//!
//! Typed transport between services, four patterns:
//!
//! - [`topic`]: pub/sub broadcast for control events, status, progress and
//!   heartbeats
//! - [`queue`]: bounded push/pull queues with competitive consumers, used
//!   for credits, raw records and metric records; producers await on a full
//!   queue, which is the back-pressure signal
//! - [`rpc`]: request/reply for synchronous lookups
//! - [`command`]: controller commands with awaited acknowledgements
//!
//! Delivery is at-least-once within a run; record-level consumers dedupe on
//! `x_request_id`. Ordering holds per producer per channel, never across
//! producers.

pub mod command;
pub mod messages;
pub mod queue;
pub mod rpc;
pub mod topic;

pub use command::{CommandAck, CommandBus, CommandListener};
pub use messages::{BusEvent, RunCommand, ServiceState};
pub use queue::{bounded_queue, Puller, Pusher};
pub use rpc::{rpc_channel, Caller, Request};
pub use topic::Topic;
