//! Fan-out of upstream messages to subscriber queues
//!
//! Each subscriber owns an unbounded queue; publishing never waits on a
//! consumer. Every published message is also appended to the audit log.
//!
//! Ordering: a subscriber sees every message published between its
//! `subscribe` and `unsubscribe`, in publish order. A subscribe racing with
//! a publish may or may not see that particular message.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use types::ids::SubscriberId;

use crate::audit::AuditLog;

/// A raw upstream message shared by all subscribers.
pub type RawMessage = Arc<str>;

/// Consumer end of a subscription. Yields `None` once unsubscribed.
pub type SubscriptionQueue = mpsc::UnboundedReceiver<RawMessage>;

/// Registry of subscriber queues.
pub struct Broadcaster {
    subscribers: DashMap<SubscriberId, mpsc::UnboundedSender<RawMessage>>,
    audit: Arc<AuditLog>,
}

impl Broadcaster {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            subscribers: DashMap::new(),
            audit,
        }
    }

    /// Register a queue for `id`. An existing registration for the same id
    /// is replaced and its queue closed.
    pub fn subscribe(&self, id: SubscriberId) -> SubscriptionQueue {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.subscribers.insert(id, tx).is_some() {
            debug!(subscriber_id = %id, "Replaced existing subscription");
        }
        info!(
            subscriber_id = %id,
            subscribers = self.subscribers.len(),
            "Subscriber added"
        );
        rx
    }

    /// Remove and close the queue for `id`. Returns false if unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        // Dropping the sender closes the queue; the consumer drains what is
        // left and then sees end-of-stream.
        match self.subscribers.remove(&id) {
            Some(_) => {
                info!(
                    subscriber_id = %id,
                    subscribers = self.subscribers.len(),
                    "Subscriber removed"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver `raw` to every registered queue and record it in the audit
    /// log. Returns the number of queues it was delivered to.
    pub fn publish(&self, raw: impl Into<RawMessage>) -> usize {
        let raw: RawMessage = raw.into();
        let mut delivered = 0;

        for entry in self.subscribers.iter() {
            if entry.value().send(Arc::clone(&raw)).is_ok() {
                delivered += 1;
            } else {
                debug!(subscriber_id = %entry.key(), "Subscriber queue already closed");
            }
        }

        self.audit.add(&*raw);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(Arc::new(AuditLog::new()))
    }

    fn drain(queue: &mut SubscriptionQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = queue.try_recv() {
            out.push(msg.to_string());
        }
        out
    }

    #[test]
    fn test_subscriber_receives_all_in_order() {
        let b = broadcaster();
        let mut queue = b.subscribe(SubscriberId::new());

        for i in 0..10 {
            assert_eq!(b.publish(format!("m{}", i)), 1);
        }

        let expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
        assert_eq!(drain(&mut queue), expected);
    }

    #[test]
    fn test_multiple_subscribers_get_same_stream() {
        let b = broadcaster();
        let mut q1 = b.subscribe(SubscriberId::new());
        let mut q2 = b.subscribe(SubscriberId::new());

        assert_eq!(b.publish("x"), 2);
        assert_eq!(b.publish("y"), 2);

        assert_eq!(drain(&mut q1), vec!["x", "y"]);
        assert_eq!(drain(&mut q2), vec!["x", "y"]);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_messages() {
        let b = broadcaster();
        b.publish("early");
        let mut queue = b.subscribe(SubscriberId::new());
        b.publish("late");
        assert_eq!(drain(&mut queue), vec!["late"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_queue() {
        let b = broadcaster();
        let id = SubscriberId::new();
        let mut queue = b.subscribe(id);

        b.publish("before");
        assert!(b.unsubscribe(id));
        b.publish("after");

        assert_eq!(queue.recv().await.as_deref(), Some("before"));
        assert_eq!(queue.recv().await, None);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let b = broadcaster();
        assert!(!b.unsubscribe(SubscriberId::new()));
    }

    #[test]
    fn test_resubscribe_replaces_queue() {
        let b = broadcaster();
        let id = SubscriberId::new();
        let mut old = b.subscribe(id);
        let mut new = b.subscribe(id);

        b.publish("m");
        assert_eq!(b.subscriber_count(), 1);
        assert!(matches!(
            old.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert_eq!(drain(&mut new), vec!["m"]);
    }

    #[test]
    fn test_publish_records_audit_without_subscribers() {
        let b = broadcaster();
        assert_eq!(b.publish("lonely"), 0);
        assert_eq!(b.audit_log().len(), 1);
        assert_eq!(b.audit_log().get_all()[0].snapshot, "lonely");
    }

    #[test]
    fn test_dropped_consumer_does_not_block_others() {
        let b = broadcaster();
        let dropped = b.subscribe(SubscriberId::new());
        let mut live = b.subscribe(SubscriberId::new());
        drop(dropped);

        assert_eq!(b.publish("m"), 1);
        assert_eq!(drain(&mut live), vec!["m"]);
    }

    #[test]
    fn test_ordering_holds_under_concurrent_churn() {
        const MESSAGES: usize = 2_000;
        const CHURNERS: usize = 4;

        let b = broadcaster();
        let mut stable: Vec<SubscriptionQueue> =
            (0..3).map(|_| b.subscribe(SubscriberId::new())).collect();

        let churned: Vec<Vec<Vec<String>>> = std::thread::scope(|scope| {
            let b = &b;
            let publisher = scope.spawn(move || {
                for i in 0..MESSAGES {
                    b.publish(format!("m{}", i));
                }
            });

            let churners: Vec<_> = (0..CHURNERS)
                .map(|_| {
                    scope.spawn(move || {
                        let mut runs = Vec::new();
                        for _ in 0..50 {
                            let id = SubscriberId::new();
                            let mut queue = b.subscribe(id);
                            std::thread::yield_now();
                            b.unsubscribe(id);
                            runs.push(drain(&mut queue));
                        }
                        runs
                    })
                })
                .collect();

            publisher.join().unwrap();
            churners.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected: Vec<String> = (0..MESSAGES).map(|i| format!("m{}", i)).collect();
        for queue in stable.iter_mut() {
            assert_eq!(drain(queue), expected);
        }

        // A subscription that overlapped the stream saw a gap-free run of it.
        for run in churned.into_iter().flatten() {
            let indices: Vec<usize> = run
                .iter()
                .map(|m| m[1..].parse().unwrap())
                .collect();
            assert!(indices.windows(2).all(|w| w[1] == w[0] + 1), "gap in {:?}", indices);
        }

        assert_eq!(b.subscriber_count(), 3);
        assert_eq!(b.audit_log().len(), b.audit_log().capacity());
    }
}
