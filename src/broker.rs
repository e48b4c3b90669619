//! In-process fan-out keyed by thread id.
//!
//! Each thread with at least one live subscriber owns a broadcast channel.
//! Publishing to a thread nobody listens to is a no-op, and the channel is
//! dropped as soon as the last [`Subscription`] goes away.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Buffered events per thread before slow receivers start lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Thread id → broadcast sender.
pub struct Broker<T> {
    topics: Arc<DashMap<i64, broadcast::Sender<T>>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<T> Default for Broker<T> {
    fn default() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Clone + Send + 'static> Broker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a receiver to the thread's topic, creating the topic if needed.
    pub fn subscribe(&self, thread_id: i64) -> Subscription<T> {
        let receiver = self
            .topics
            .entry(thread_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        Subscription {
            thread_id,
            receiver,
            topics: Arc::clone(&self.topics),
        }
    }

    /// Deliver an event to every current subscriber of the thread.
    ///
    /// Returns the number of receivers reached.
    pub fn publish(&self, thread_id: i64, event: T) -> usize {
        let delivered = match self.topics.get(&thread_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => return 0,
        };

        if delivered == 0 {
            self.topics
                .remove_if(&thread_id, |_, sender| sender.receiver_count() == 0);
        }

        delivered
    }

    /// Number of threads with a live topic.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Current subscribers of one thread.
    pub fn subscriber_count(&self, thread_id: i64) -> usize {
        self.topics
            .get(&thread_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// A receiver on one thread's topic.
///
/// Dropping the last subscription of a thread removes the topic.
pub struct Subscription<T> {
    thread_id: i64,
    receiver: broadcast::Receiver<T>,
    topics: Arc<DashMap<i64, broadcast::Sender<T>>>,
}

impl<T> Deref for Subscription<T> {
    type Target = broadcast::Receiver<T>;

    fn deref(&self) -> &Self::Target {
        &self.receiver
    }
}

impl<T> DerefMut for Subscription<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.receiver
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        // Our receiver is still attached here, so "last" means a count of one.
        // Subscribing takes the same shard lock, so no new receiver can slip in.
        self.topics
            .remove_if(&self.thread_id, |_, sender| sender.receiver_count() <= 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_of_same_thread_only() {
        let broker: Broker<i64> = Broker::new();
        let mut a = broker.subscribe(1);
        let mut b = broker.subscribe(2);

        assert_eq!(broker.publish(1, 42), 1);
        assert_eq!(a.recv().await.unwrap(), 42);
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let broker: Broker<i64> = Broker::new();
        assert_eq!(broker.publish(7, 1), 0);
        assert_eq!(broker.topic_count(), 0);
    }

    #[test]
    fn test_topic_dropped_after_last_receiver() {
        let broker: Broker<i64> = Broker::new();
        let rx = broker.subscribe(3);
        assert_eq!(broker.subscriber_count(3), 1);
        drop(rx);

        assert_eq!(broker.subscriber_count(3), 0);
        assert_eq!(broker.topic_count(), 0);
        assert_eq!(broker.publish(3, 1), 0);
    }

    #[tokio::test]
    async fn test_topic_survives_while_any_subscriber_remains() {
        let broker: Broker<i64> = Broker::new();
        let first = broker.subscribe(4);
        let mut second = broker.subscribe(4);
        drop(first);

        assert_eq!(broker.topic_count(), 1);
        assert_eq!(broker.publish(4, 9), 1);
        assert_eq!(second.recv().await.unwrap(), 9);

        drop(second);
        assert_eq!(broker.topic_count(), 0);
    }
}
