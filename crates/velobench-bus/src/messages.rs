//! Bus message shapes
//!
//! One closed set of message kinds with a `message_type` discriminator.
//! Everything is a plain serde struct or enum, JSON-framable for export or
//! debugging, cloneable for broadcast fan-out.

use serde::{Deserialize, Serialize};
use velobench_core::types::{ConversationId, CreditPhase, RunPhase, WorkerId};

/// Commands issued by the controller, acknowledged by every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCommand {
    Configure,
    Start,
    StopScheduling,
    Shutdown,
}

/// Lifecycle state a service reports on the status channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    Initialized,
    Running,
    Stopped,
    Failed { message: String },
}

/// Everything that travels on the broadcast topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum BusEvent {
    Heartbeat {
        service: String,
        seq: u64,
        at_ns: u64,
    },
    ServiceStatus {
        service: String,
        status: ServiceState,
    },
    PhaseChanged {
        phase: RunPhase,
        at_ns: u64,
    },
    /// Published by the aggregator once per record it accepts; doubles as
    /// the credit-freed signal for the scheduler's concurrency gate and as
    /// the trigger for follow-up turn credits.
    RecordSealed {
        x_request_id: String,
        conversation_id: ConversationId,
        turn_index: usize,
        session_num: u64,
        worker_id: WorkerId,
        phase: CreditPhase,
        final_turn: bool,
        had_error: bool,
        end_ns: u64,
    },
    /// The scheduler will issue no further credits.
    SchedulingComplete {
        credits_issued: u64,
        /// Monotonic time the first profiling credit was issued, when any was.
        profiling_start_ns: Option<u64>,
        /// Duration-mode measurement window end, when the run is time-bounded.
        profiling_deadline_ns: Option<u64>,
    },
    Progress {
        completed: u64,
        errors: u64,
        target: Option<u64>,
    },
    Fatal {
        service: String,
        message: String,
    },
}

impl BusEvent {
    pub fn status(service: impl Into<String>, status: ServiceState) -> Self {
        BusEvent::ServiceStatus {
            service: service.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_round_trip_with_discriminator() {
        let event = BusEvent::Heartbeat {
            service: "scheduler".into(),
            seq: 3,
            at_ns: 123,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["message_type"], "heartbeat");
        let back: BusEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn failed_status_carries_message() {
        let event = BusEvent::status("workers", ServiceState::Failed { message: "boom".into() });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"]["state"], "failed");
        assert_eq!(json["status"]["message"], "boom");
    }
}
