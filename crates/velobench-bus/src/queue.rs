//! Bounded push/pull queues
//!
//! Load-balanced work distribution: any number of producers push, any
//! number of consumers pull competitively. The queue is bounded; `push`
//! awaits when full, so overload propagates upstream instead of growing
//! memory.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use velobench_core::{Error, Result};

pub struct Pusher<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Pusher<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

impl<T> Pusher<T> {
    /// Push one item, awaiting while the queue is at capacity.
    pub async fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| Error::ChannelClosed(self.name))
    }
}

pub struct Puller<T> {
    name: &'static str,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Puller<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> Puller<T> {
    /// Pull the next item; `None` once every producer is gone and the
    /// queue has drained.
    pub async fn pull(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Create a bounded push/pull queue. The name shows up in channel-closed
/// errors and logs.
pub fn bounded_queue<T>(name: &'static str, capacity: usize) -> (Pusher<T>, Puller<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Pusher { name, tx },
        Puller {
            name,
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn items_flow_in_order_per_producer() {
        let (push, pull) = bounded_queue("test", 8);
        for i in 0..4 {
            push.push(i).await.unwrap();
        }
        drop(push);
        let mut got = Vec::new();
        while let Some(i) = pull.pull().await {
            got.push(i);
        }
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn competitive_consumers_partition_the_stream() {
        let (push, pull) = bounded_queue("test", 64);
        let a = pull.clone();
        let b = pull.clone();
        let consumer = |p: Puller<u32>| {
            tokio::spawn(async move {
                let mut n = 0u32;
                while p.pull().await.is_some() {
                    n += 1;
                }
                n
            })
        };
        let ha = consumer(a);
        let hb = consumer(b);
        for i in 0..100u32 {
            push.push(i).await.unwrap();
        }
        drop(push);
        drop(pull);
        let total = ha.await.unwrap() + hb.await.unwrap();
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn full_queue_blocks_until_a_pull() {
        let (push, pull) = bounded_queue("test", 1);
        push.push(1u8).await.unwrap();
        // Queue is full: a second push must wait for the consumer.
        let pending = tokio::spawn({
            let push = push.clone();
            async move { push.push(2u8).await }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        assert_eq!(pull.pull().await, Some(1));
        pending.await.unwrap().unwrap();
        assert_eq!(pull.pull().await, Some(2));
    }

    #[tokio::test]
    async fn push_after_consumers_gone_errors() {
        let (push, pull) = bounded_queue::<u8>("records", 1);
        drop(pull);
        assert!(push.push(1).await.is_err());
    }
}
