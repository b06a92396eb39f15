//! Service lifecycle runner

use crate::heartbeat::spawn_heartbeat;
use async_trait::async_trait;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use velobench_bus::{BusEvent, CommandBus, CommandListener, RunCommand, ServiceState, Topic};
use velobench_core::{MonoClock, Result};

/// What the harness hands a service for its run phase.
pub struct ServiceContext {
    pub shutdown: CancellationToken,
    pub commands: CommandListener,
    pub clock: MonoClock,
}

/// A VeloBench service. The harness drives the hooks; `run` owns the
/// service's main loop and returns when its input closes or shutdown is
/// signalled.
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, ctx: ServiceContext) -> Result<()>;

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared wiring for spawning services: event topic, command bus, shutdown
/// root and heartbeat cadence.
#[derive(Clone)]
pub struct ServiceRunner {
    pub events: Topic<BusEvent>,
    pub commands: CommandBus,
    pub shutdown: CancellationToken,
    pub clock: MonoClock,
    pub heartbeat_interval: Duration,
}

impl ServiceRunner {
    /// Drive a service through its lifecycle:
    /// init → initialized status → configure/start handshake → heartbeats +
    /// run → stop → stopped status. Failures surface as a failed status so
    /// the controller can abort the run.
    pub fn spawn<S: Service>(&self, mut service: S) -> JoinHandle<Result<()>> {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let clock = self.clock;
        let heartbeat_interval = self.heartbeat_interval;
        let mut listener = self.commands.listener(service.name());

        tokio::spawn(async move {
            let name = service.name();

            if let Err(err) = service.init().await {
                error!(service = name, %err, "service init failed");
                events.publish(BusEvent::status(
                    name,
                    ServiceState::Failed {
                        message: err.to_string(),
                    },
                ));
                return Err(err);
            }
            events.publish(BusEvent::status(name, ServiceState::Initialized));

            // Handshake: ack Configure, proceed on Start, bail on Shutdown.
            loop {
                tokio::select! {
                    command = listener.next() => match command {
                        Some(RunCommand::Configure) => listener.ack(RunCommand::Configure).await,
                        Some(RunCommand::Start) => {
                            listener.ack(RunCommand::Start).await;
                            break;
                        }
                        Some(RunCommand::Shutdown) | None => {
                            listener.ack(RunCommand::Shutdown).await;
                            events.publish(BusEvent::status(name, ServiceState::Stopped));
                            return Ok(());
                        }
                        Some(_) => {}
                    },
                    _ = shutdown.cancelled() => {
                        events.publish(BusEvent::status(name, ServiceState::Stopped));
                        return Ok(());
                    }
                }
            }

            events.publish(BusEvent::status(name, ServiceState::Running));
            let beat_token = shutdown.child_token();
            let beat = spawn_heartbeat(name, events.clone(), clock, heartbeat_interval, beat_token.clone());

            let ctx = ServiceContext {
                shutdown: shutdown.clone(),
                commands: listener,
                clock,
            };
            let run_result = service.run(ctx).await;
            beat_token.cancel();
            let _ = beat.await;

            match run_result {
                Ok(()) => {
                    service.stop().await?;
                    info!(service = name, "service stopped");
                    events.publish(BusEvent::status(name, ServiceState::Stopped));
                    Ok(())
                }
                Err(err) => {
                    error!(service = name, %err, "service failed");
                    events.publish(BusEvent::Fatal {
                        service: name.to_string(),
                        message: err.to_string(),
                    });
                    events.publish(BusEvent::status(
                        name,
                        ServiceState::Failed {
                            message: err.to_string(),
                        },
                    ));
                    Err(err)
                }
            }
        })
    }
}
