//! Controller commands with awaited acknowledgements

use crate::messages::RunCommand;
use crate::topic::Topic;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use velobench_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub service: String,
    pub command: RunCommand,
}

/// Command fan-out plus the shared ack lane back to the controller.
pub struct CommandBus {
    topic: Topic<RunCommand>,
    ack_tx: mpsc::Sender<CommandAck>,
}

impl Clone for CommandBus {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            ack_tx: self.ack_tx.clone(),
        }
    }
}

impl CommandBus {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CommandAck>) {
        let (ack_tx, ack_rx) = mpsc::channel(capacity);
        (
            Self {
                topic: Topic::new(capacity),
                ack_tx,
            },
            ack_rx,
        )
    }

    pub fn broadcast(&self, command: RunCommand) {
        self.topic.publish(command);
    }

    /// Broadcast a command and await `expected` acknowledgements.
    pub async fn issue(
        &self,
        command: RunCommand,
        expected: usize,
        ack_rx: &mut mpsc::Receiver<CommandAck>,
        timeout: Duration,
    ) -> Result<()> {
        self.broadcast(command);
        let mut acked = 0usize;
        let deadline = tokio::time::Instant::now() + timeout;
        while acked < expected {
            match tokio::time::timeout_at(deadline, ack_rx.recv()).await {
                Ok(Some(ack)) if ack.command == command => acked += 1,
                // Stale ack from an earlier command; drop it.
                Ok(Some(_)) => {}
                Ok(None) => return Err(Error::ChannelClosed("command-ack")),
                Err(_) => {
                    warn!(?command, acked, expected, "command acknowledgement timed out");
                    return Err(Error::Internal(format!(
                        "{acked}/{expected} services acknowledged {command:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn listener(&self, service: impl Into<String>) -> CommandListener {
        CommandListener {
            service: service.into(),
            rx: self.topic.subscribe(),
            ack_tx: self.ack_tx.clone(),
        }
    }
}

/// A service's view of the command channel.
pub struct CommandListener {
    service: String,
    rx: tokio::sync::broadcast::Receiver<RunCommand>,
    ack_tx: mpsc::Sender<CommandAck>,
}

impl CommandListener {
    /// Next command; lagged gaps are skipped, `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<RunCommand> {
        loop {
            match self.rx.recv().await {
                Ok(command) => return Some(command),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(service = %self.service, missed, "command listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub async fn ack(&self, command: RunCommand) {
        let _ = self
            .ack_tx
            .send(CommandAck {
                service: self.service.clone(),
                command,
            })
            .await;
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
