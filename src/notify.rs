use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub feeding the notification dispatcher. Hearing events are
/// published on their court's channel, case events on the case's channel.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a court or case. Creates the channel if needed.
    pub fn subscribe(&self, id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening; a channel found
    /// with no receivers left is dropped.
    pub fn send(&self, id: Ulid, event: &Event) {
        let delivered = match self.channels.get(&id) {
            Some(sender) => sender.send(event.clone()).is_ok(),
            None => return,
        };
        // The shard guard is released above; pruning under it would deadlock.
        if !delivered {
            self.prune(&id);
        }
    }

    /// Drop a channel whose subscribers have all gone away.
    fn prune(&self, id: &Ulid) {
        self.channels
            .remove_if(id, |_, sender| sender.receiver_count() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let case_id = Ulid::new();
        let mut rx = hub.subscribe(case_id);

        let event = Event::CaseOpened { id: case_id };
        hub.send(case_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        hub.send(id, &Event::CaseOpened { id });
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, &Event::CaseOpened { id: b });
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn prune_keeps_live_channels() {
        let hub = NotifyHub::new();
        let id = Ulid::new();
        let mut rx = hub.subscribe(id);
        hub.prune(&id);
        hub.send(id, &Event::CaseOpened { id });
        assert!(rx.recv().await.is_ok());

        drop(rx);
        hub.prune(&id);
        assert!(hub.channels.is_empty());
        let mut rx2 = hub.subscribe(id);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let (live, abandoned) = (Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(live);
        drop(hub.subscribe(abandoned));
        assert_eq!(hub.channels.len(), 2);

        hub.send(abandoned, &Event::CaseOpened { id: abandoned });
        hub.send(live, &Event::CaseOpened { id: live });
        assert_eq!(hub.channels.len(), 1);
        assert!(hub.channels.contains_key(&live));
        assert!(rx.recv().await.is_ok());
    }
}
