//! Change notification fan-out.
//!
//! Connected clients (and in-process listeners like a live UI bridge)
//! subscribe through a bounded broadcast channel. A subscriber that falls
//! more than the channel capacity behind loses the oldest events and is
//! told how many it missed; it should resync rather than replay.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    FeedUpdated(i64),
    FeedRemoved(i64),
    FolderChanged(i64),
    ArticlesIngested { feed_id: i64, count: usize },
}

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. With nobody listening the event
    /// is simply dropped.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let notifier = ChangeNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(ChangeEvent::FeedUpdated(7));
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::FeedUpdated(7));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let notifier = ChangeNotifier::new();
        notifier.publish(ChangeEvent::FeedRemoved(1));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let notifier = ChangeNotifier::new();
        let mut rx = notifier.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 10) {
            notifier.publish(ChangeEvent::FeedUpdated(i as i64));
        }

        // The receiver reports lost events, then resumes with the oldest
        // retained one.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(missed)) => assert!(missed >= 10),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
    }
}
