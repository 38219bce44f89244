use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed changes. Subscribers refresh their cached
/// availability and reservation views when anything arrives.
pub struct NotifyHub {
    sender: broadcast::Sender<Event>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        let event = Event::ResourceDeleted { id: Ulid::new() };
        hub.send(&event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(&Event::ResourceDeleted { id: Ulid::new() });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
