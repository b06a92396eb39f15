//! Run phase machine and health monitoring

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use velobench_bus::{BusEvent, CommandAck, CommandBus, RunCommand, ServiceState, Topic};
use velobench_core::types::{CreditPhase, RunPhase};
use velobench_core::{Error, MonoClock, Result};

/// Controller tuning, distilled from the profile configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub expected_services: Vec<&'static str>,
    pub warmup_request_count: u64,
    pub grace_period: Duration,
    pub heartbeat_interval: Duration,
    pub missed_heartbeat_limit: u32,
    pub startup_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_phase: RunPhase,
    pub abort_reason: Option<String>,
}

impl RunOutcome {
    pub fn aborted(&self) -> bool {
        self.final_phase == RunPhase::Aborted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Starting,
    Running,
    Stopped,
}

/// Drives the run: startup handshake, phase transitions, heartbeat health,
/// drain and shutdown.
pub struct Controller {
    settings: ControllerSettings,
    events: Topic<BusEvent>,
    subscription: tokio::sync::broadcast::Receiver<BusEvent>,
    commands: CommandBus,
    ack_rx: mpsc::Receiver<CommandAck>,
    shutdown: CancellationToken,
    clock: MonoClock,
    phase: RunPhase,
}

impl Controller {
    /// Construct before spawning any service: the event subscription is
    /// taken here, so no startup status message can be missed.
    pub fn new(
        settings: ControllerSettings,
        events: Topic<BusEvent>,
        commands: CommandBus,
        ack_rx: mpsc::Receiver<CommandAck>,
        shutdown: CancellationToken,
        clock: MonoClock,
    ) -> Self {
        let subscription = events.subscribe();
        Self {
            settings,
            events,
            subscription,
            commands,
            ack_rx,
            shutdown,
            clock,
            phase: RunPhase::Init,
        }
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase == phase {
            return;
        }
        info!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
        self.events.publish(BusEvent::PhaseChanged {
            phase,
            at_ns: self.clock.now_ns(),
        });
    }

    async fn wait_for_initialized(&mut self) -> Result<()> {
        let mut pending: Vec<&str> = self.settings.expected_services.clone();
        let deadline = tokio::time::Instant::now() + self.settings.startup_timeout;
        while !pending.is_empty() {
            let event = tokio::time::timeout_at(deadline, self.subscription.recv())
                .await
                .map_err(|_| {
                    Error::Internal(format!("services never initialized: {pending:?}"))
                })?
                .map_err(|_| Error::ChannelClosed("events"))?;
            match event {
                BusEvent::ServiceStatus {
                    service,
                    status: ServiceState::Initialized,
                } => pending.retain(|name| *name != service),
                BusEvent::ServiceStatus {
                    service,
                    status: ServiceState::Failed { message },
                } => {
                    return Err(Error::Internal(format!("{service} failed during init: {message}")));
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn abort(&mut self, reason: String) -> RunOutcome {
        error!(%reason, "aborting run");
        self.set_phase(RunPhase::Aborted);
        self.commands.broadcast(RunCommand::Shutdown);
        self.shutdown.cancel();
        RunOutcome {
            final_phase: RunPhase::Aborted,
            abort_reason: Some(reason),
        }
    }

    /// Drive the run to completion.
    pub async fn run(mut self) -> Result<RunOutcome> {
        let expected = self.settings.expected_services.len();

        self.wait_for_initialized().await?;
        self.set_phase(RunPhase::Ready);

        self.commands
            .issue(
                RunCommand::Configure,
                expected,
                &mut self.ack_rx,
                self.settings.startup_timeout,
            )
            .await?;
        self.commands
            .issue(
                RunCommand::Start,
                expected,
                &mut self.ack_rx,
                self.settings.startup_timeout,
            )
            .await?;

        if self.settings.warmup_request_count > 0 {
            self.set_phase(RunPhase::Warmup);
        } else {
            self.set_phase(RunPhase::Profiling);
        }

        let mut liveness: HashMap<String, (Liveness, u64)> = HashMap::new();
        let mut warmup_sealed = 0u64;
        let mut grace_deadline: Option<tokio::time::Instant> = None;
        let mut forced_abort_at: Option<tokio::time::Instant> = None;
        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                event = self.subscription.recv() => match event {
                    Ok(BusEvent::Heartbeat { service, at_ns, .. }) => {
                        let entry = liveness
                            .entry(service)
                            .or_insert((Liveness::Running, at_ns));
                        entry.0 = Liveness::Running;
                        entry.1 = at_ns;
                    }
                    Ok(BusEvent::ServiceStatus { service, status }) => match status {
                        ServiceState::Stopped => {
                            liveness
                                .entry(service.clone())
                                .or_insert((Liveness::Stopped, 0))
                                .0 = Liveness::Stopped;
                            // The aggregator stopping cleanly means every
                            // record is sealed and finalized: drain is over.
                            if service == "aggregator" {
                                self.set_phase(RunPhase::Finalizing);
                                break RunOutcome {
                                    final_phase: RunPhase::Finalizing,
                                    abort_reason: None,
                                };
                            }
                        }
                        ServiceState::Failed { message } => {
                            break self.abort(format!("{service} failed: {message}")).await;
                        }
                        _ => {}
                    },
                    Ok(BusEvent::Fatal { service, message }) => {
                        break self.abort(format!("{service}: {message}")).await;
                    }
                    Ok(BusEvent::RecordSealed { phase, .. }) => {
                        if phase == CreditPhase::Warmup && self.phase == RunPhase::Warmup {
                            warmup_sealed += 1;
                            if warmup_sealed >= self.settings.warmup_request_count {
                                // Aggregator anchors its measurement window
                                // on the first profiling record.
                                self.set_phase(RunPhase::Profiling);
                            }
                        }
                    }
                    Ok(BusEvent::SchedulingComplete { credits_issued, .. }) => {
                        info!(credits_issued, "scheduling complete, draining in-flight requests");
                        self.set_phase(RunPhase::Cooldown);
                        grace_deadline =
                            Some(tokio::time::Instant::now() + self.settings.grace_period);
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "controller lagged on bus events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break self.abort("event bus closed".into()).await;
                    }
                },
                _ = ticker.tick() => {
                    // Grace period: outstanding requests are cancelled once
                    // the drain allowance is spent.
                    if let Some(deadline) = grace_deadline {
                        if tokio::time::Instant::now() >= deadline && forced_abort_at.is_none() {
                            warn!("grace period exceeded, cancelling outstanding requests");
                            self.shutdown.cancel();
                            forced_abort_at = Some(
                                tokio::time::Instant::now() + self.settings.heartbeat_interval * 5,
                            );
                        }
                    }
                    if let Some(deadline) = forced_abort_at {
                        if tokio::time::Instant::now() >= deadline {
                            break self.abort("drain did not complete after grace period".into()).await;
                        }
                    }
                    let now = self.clock.now_ns();
                    let allowed = self.settings.heartbeat_interval.as_nanos() as u64
                        * (self.settings.missed_heartbeat_limit as u64 + 1);
                    let stale: Option<String> = liveness
                        .iter()
                        .find(|(_, (state, last))| {
                            *state == Liveness::Running && now.saturating_sub(*last) > allowed
                        })
                        .map(|(name, _)| name.clone());
                    if let Some(service) = stale {
                        break self.abort(format!("{service} missed heartbeats")).await;
                    }
                }
                _ = self.shutdown.cancelled() => {
                    // External interrupt (signal handler cancelled the root).
                    break RunOutcome {
                        final_phase: RunPhase::Aborted,
                        abort_reason: Some("interrupted".into()),
                    };
                }
            }
        };

        if !outcome.aborted() {
            self.commands.broadcast(RunCommand::Shutdown);
            self.set_phase(RunPhase::Done);
            return Ok(RunOutcome {
                final_phase: RunPhase::Done,
                abort_reason: None,
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velobench_bus::CommandListener;

    fn settings(services: Vec<&'static str>) -> ControllerSettings {
        ControllerSettings {
            expected_services: services,
            warmup_request_count: 0,
            grace_period: Duration::from_secs(5),
            heartbeat_interval: Duration::from_millis(50),
            missed_heartbeat_limit: 5,
            startup_timeout: Duration::from_secs(2),
        }
    }

    /// A fake service endpoint: acks commands, reports states.
    fn fake_service(
        name: &'static str,
        events: Topic<BusEvent>,
        mut listener: CommandListener,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            events.publish(BusEvent::status(name, ServiceState::Initialized));
            while let Some(command) = listener.next().await {
                listener.ack(command).await;
                if command == RunCommand::Start {
                    break;
                }
            }
            events.publish(BusEvent::status(name, ServiceState::Running));
        })
    }

    #[tokio::test]
    async fn run_completes_when_aggregator_stops() {
        let events: Topic<BusEvent> = Topic::new(256);
        let (commands, ack_rx) = CommandBus::new(64);
        let controller = Controller::new(
            settings(vec!["scheduler", "aggregator"]),
            events.clone(),
            commands.clone(),
            ack_rx,
            CancellationToken::new(),
            MonoClock::new(),
        );

        fake_service("scheduler", events.clone(), commands.listener("scheduler"));
        fake_service("aggregator", events.clone(), commands.listener("aggregator"));

        let driver = {
            let events = events.clone();
            tokio::spawn(async move {
                // Give the handshake a moment, then walk the happy path.
                tokio::time::sleep(Duration::from_millis(100)).await;
                events.publish(BusEvent::SchedulingComplete {
                    credits_issued: 1,
                    profiling_start_ns: Some(0),
                    profiling_deadline_ns: None,
                });
                tokio::time::sleep(Duration::from_millis(50)).await;
                events.publish(BusEvent::status("aggregator", ServiceState::Stopped));
            })
        };

        let outcome = controller.run().await.unwrap();
        driver.await.unwrap();
        assert_eq!(outcome.final_phase, RunPhase::Done);
        assert!(outcome.abort_reason.is_none());
    }

    #[tokio::test]
    async fn service_failure_aborts_the_run() {
        let events: Topic<BusEvent> = Topic::new(256);
        let (commands, ack_rx) = CommandBus::new(64);
        let token = CancellationToken::new();
        let controller = Controller::new(
            settings(vec!["scheduler"]),
            events.clone(),
            commands.clone(),
            ack_rx,
            token.clone(),
            MonoClock::new(),
        );

        fake_service("scheduler", events.clone(), commands.listener("scheduler"));
        let driver = {
            let events = events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                events.publish(BusEvent::status(
                    "scheduler",
                    ServiceState::Failed {
                        message: "dataset vanished".into(),
                    },
                ));
            })
        };

        let outcome = controller.run().await.unwrap();
        driver.await.unwrap();
        assert!(outcome.aborted());
        assert!(outcome.abort_reason.unwrap().contains("dataset vanished"));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn startup_timeout_names_missing_services() {
        let events: Topic<BusEvent> = Topic::new(256);
        let (commands, ack_rx) = CommandBus::new(64);
        let controller = Controller::new(
            ControllerSettings {
                startup_timeout: Duration::from_millis(100),
                ..settings(vec!["ghost"])
            },
            events.clone(),
            commands,
            ack_rx,
            CancellationToken::new(),
            MonoClock::new(),
        );
        let err = controller.run().await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
