//! Typed chain events. Subscribers get their own channel and pull at their
//! own pace; a dropped subscriber is pruned on the next publish.

use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use xcoind_consensus::Hash256;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChainEvent {
    /// The best chain advanced (or pivoted) to a new tip.
    NewTip { hash: Hash256, height: i32 },
    /// A transaction entered the memory pool.
    TxAccepted { txid: Hash256 },
    /// A transaction left the pool without confirming (conflict or
    /// supersession by a connected block).
    TxInvalidated { txid: Hash256 },
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ChainEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .lock()
            .expect("event bus lock")
            .push(sender);
        receiver
    }

    pub fn publish(&self, event: ChainEvent) {
        let mut subscribers = self.subscribers.lock().expect("event bus lock");
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(ChainEvent::TxAccepted { txid: [1u8; 32] });
        assert_eq!(a.try_recv().ok(), Some(ChainEvent::TxAccepted { txid: [1u8; 32] }));
        assert_eq!(b.try_recv().ok(), Some(ChainEvent::TxAccepted { txid: [1u8; 32] }));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(ChainEvent::NewTip {
            hash: [2u8; 32],
            height: 5,
        });
        assert!(a.try_recv().is_ok());
    }
}
