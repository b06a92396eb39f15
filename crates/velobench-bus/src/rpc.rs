//! Request/reply channel

use tokio::sync::{mpsc, oneshot};
use velobench_core::{Error, Result};

/// An in-flight request: the payload plus the reply slot.
pub struct Request<Req, Resp> {
    payload: Req,
    reply: oneshot::Sender<Resp>,
}

impl<Req, Resp> Request<Req, Resp> {
    pub fn payload(&self) -> &Req {
        &self.payload
    }

    pub fn into_payload(self) -> (Req, oneshot::Sender<Resp>) {
        (self.payload, self.reply)
    }

    /// Send the reply. A caller that gave up waiting is not an error.
    pub fn respond(self, response: Resp) {
        let _ = self.reply.send(response);
    }
}

pub struct Caller<Req, Resp> {
    name: &'static str,
    tx: mpsc::Sender<Request<Req, Resp>>,
}

impl<Req, Resp> Clone for Caller<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<Req, Resp> Caller<Req, Resp> {
    /// Synchronous call: send the request and await the reply.
    pub async fn call(&self, payload: Req) -> Result<Resp> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request { payload, reply })
            .await
            .map_err(|_| Error::ChannelClosed(self.name))?;
        rx.await.map_err(|_| Error::ChannelClosed(self.name))
    }
}

/// Create a request/reply channel; the handler side is a plain receiver to
/// drive from the serving task's loop.
pub fn rpc_channel<Req, Resp>(
    name: &'static str,
    capacity: usize,
) -> (Caller<Req, Resp>, mpsc::Receiver<Request<Req, Resp>>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Caller { name, tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_round_trips() {
        let (caller, mut handler) = rpc_channel::<u32, u32>("doubler", 4);
        tokio::spawn(async move {
            while let Some(req) = handler.recv().await {
                let doubled = *req.payload() * 2;
                req.respond(doubled);
            }
        });
        assert_eq!(caller.call(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_handler_yields_channel_closed() {
        let (caller, handler) = rpc_channel::<u32, u32>("gone", 1);
        drop(handler);
        assert!(matches!(
            caller.call(1).await,
            Err(Error::ChannelClosed("gone"))
        ));
    }
}
