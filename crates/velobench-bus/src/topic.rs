//! Pub/sub topic broadcast

use tokio::sync::broadcast;

/// Topic broadcast: every subscriber sees every message published after it
/// subscribed. Publishing never blocks; slow subscribers lag and observe a
/// `RecvError::Lagged` gap instead of stalling producers.
pub struct Topic<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers. A topic with no subscribers
    /// drops the message, which is fine for status traffic.
    pub fn publish(&self, message: T) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_subscribers_see_all_messages() {
        let topic = Topic::new(16);
        let mut a = topic.subscribe();
        let mut b = topic.subscribe();
        topic.publish(1u8);
        topic.publish(2u8);
        assert_eq!(a.recv().await.unwrap(), 1);
        assert_eq!(a.recv().await.unwrap(), 2);
        assert_eq!(b.recv().await.unwrap(), 1);
        assert_eq!(b.recv().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let topic: Topic<u8> = Topic::new(4);
        topic.publish(9);
        let mut sub = topic.subscribe();
        topic.publish(10);
        assert_eq!(sub.recv().await.unwrap(), 10);
    }
}
