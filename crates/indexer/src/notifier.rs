//! Post-commit fan-out.
//!
//! The indexer publishes one `Block` update and then the `Tx` updates of a
//! batch strictly after the owning database transaction has committed, so a
//! subscriber can never observe an update it cannot also read back. Publishing
//! never blocks the ingestion path: every subscriber gets its own bounded
//! queue and chooses what happens when it falls behind.

use {
    database::{blocks::Block, txs::Tx},
    std::sync::Mutex,
    tokio::sync::mpsc,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Block(Block),
    Tx(Tx),
}

/// What to do with a subscriber whose queue is full.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OverflowPolicy {
    /// Drop this notification for this subscriber and keep it subscribed.
    DropNewest,
    /// Close the lagging subscriber's channel.
    Disconnect,
}

struct Subscriber {
    sender: mpsc::Sender<Notification>,
    policy: OverflowPolicy,
}

/// Fan-out point for block and transaction updates.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Notifier {
    /// Register a subscriber with a queue of `capacity` notifications.
    /// Dropping the receiver unsubscribes; the next publish prunes it.
    pub fn subscribe(
        &self,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> mpsc::Receiver<Notification> {
        let (sender, receiver) = mpsc::channel(capacity);
        self.subscribers
            .lock()
            .expect("subscriber set poisoned")
            .push(Subscriber { sender, policy });
        receiver
    }

    pub fn publish(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock().expect("subscriber set poisoned");
        subscribers.retain(|subscriber| {
            match subscriber.sender.try_send(notification.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => match subscriber.policy {
                    OverflowPolicy::DropNewest => {
                        tracing::debug!("subscriber queue full, dropping notification");
                        true
                    }
                    OverflowPolicy::Disconnect => {
                        tracing::warn!("disconnecting lagging subscriber");
                        false
                    }
                },
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, database::byte_array::ByteArray};

    fn block(height: i64) -> Notification {
        Notification::Block(Block {
            block_height: height,
            ..Default::default()
        })
    }

    fn tx(index: i32) -> Notification {
        Notification::Tx(Tx {
            tx_id: ByteArray([index as u8; 32]),
            tx_index: index,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let notifier = Notifier::default();
        let mut updates = notifier.subscribe(8, OverflowPolicy::DropNewest);

        notifier.publish(block(1));
        notifier.publish(tx(0));
        notifier.publish(tx(1));

        assert_eq!(updates.recv().await.unwrap(), block(1));
        assert_eq!(updates.recv().await.unwrap(), tx(0));
        assert_eq!(updates.recv().await.unwrap(), tx(1));
    }

    #[tokio::test]
    async fn drop_newest_keeps_subscriber() {
        let notifier = Notifier::default();
        let mut updates = notifier.subscribe(1, OverflowPolicy::DropNewest);

        notifier.publish(block(1));
        notifier.publish(block(2)); // queue full, dropped
        notifier.publish(tx(0)); // still full, dropped

        assert_eq!(updates.recv().await.unwrap(), block(1));
        assert_eq!(notifier.subscriber_count(), 1);

        // with the queue drained delivery resumes
        notifier.publish(block(3));
        assert_eq!(updates.recv().await.unwrap(), block(3));
    }

    #[tokio::test]
    async fn disconnect_removes_lagging_subscriber() {
        let notifier = Notifier::default();
        let mut updates = notifier.subscribe(1, OverflowPolicy::Disconnect);

        notifier.publish(block(1));
        notifier.publish(block(2)); // queue full, subscriber dropped

        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(updates.recv().await.unwrap(), block(1));
        // channel closed afterwards
        assert_eq!(updates.recv().await, None);
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() {
        let notifier = Notifier::default();
        let updates = notifier.subscribe(4, OverflowPolicy::DropNewest);
        drop(updates);

        notifier.publish(block(1));
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_affect_others() {
        let notifier = Notifier::default();
        let mut fast = notifier.subscribe(8, OverflowPolicy::DropNewest);
        let mut slow = notifier.subscribe(1, OverflowPolicy::DropNewest);

        notifier.publish(block(1));
        notifier.publish(block(2));

        assert_eq!(fast.recv().await.unwrap(), block(1));
        assert_eq!(fast.recv().await.unwrap(), block(2));
        assert_eq!(slow.recv().await.unwrap(), block(1));
    }
}
