//! Periodic service heartbeats

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use velobench_bus::{BusEvent, Topic};
use velobench_core::MonoClock;

/// Spawn the heartbeat tick for a service. Runs until the token cancels.
pub fn spawn_heartbeat(
    service: &'static str,
    events: Topic<BusEvent>,
    clock: MonoClock,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut seq = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    events.publish(BusEvent::Heartbeat {
                        service: service.to_string(),
                        seq,
                        at_ns: clock.now_ns(),
                    });
                    seq += 1;
                }
                _ = token.cancelled() => break,
            }
        }
    })
}
