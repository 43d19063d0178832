// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::{Arc, RwLock};

use popstore_kernel::event::StoreEvent;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

type Subscribers = Arc<Vec<mpsc::Sender<StoreEvent>>>;

/// Multi-subscriber event bus.
///
/// The subscriber list is copy-on-write: emitters work on a snapshot, so
/// registering a channel never waits on a blocked emission.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Subscribers>>,
    sequencer: Arc<Mutex<()>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, tx: mpsc::Sender<StoreEvent>) {
        let mut guard = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.push(tx);
        *guard = Arc::new(next);
    }

    /// Registers a new bounded channel and returns its receiving end.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.add_channel(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Subscribers {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Takes the next emission slot.
    ///
    /// Writers reserve while still holding their data lock, then release it
    /// and emit, which keeps event order equal to commit order.
    pub async fn reserve(&self) -> EmitPermit {
        EmitPermit {
            _slot: self.sequencer.clone().lock_owned().await,
            bus: self.clone(),
        }
    }

    pub async fn emit(&self, event: StoreEvent) {
        self.reserve().await.emit(event).await;
    }

    fn prune_closed(&self) {
        let mut guard = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let kept: Vec<_> = guard.iter().filter(|s| !s.is_closed()).cloned().collect();
        *guard = Arc::new(kept);
    }
}

/// An exclusive right to emit the next event.
pub struct EmitPermit {
    _slot: OwnedMutexGuard<()>,
    bus: EventBus,
}

impl EmitPermit {
    pub async fn emit(self, event: StoreEvent) {
        let subscribers = self.bus.snapshot();
        let mut closed = false;
        for tx in subscribers.iter() {
            if tx.send(event.clone()).await.is_err() {
                closed = true;
            }
        }
        if closed {
            tracing::debug!("dropping closed event subscribers");
            self.bus.prune_closed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use popstore_kernel::types::Link;
    use std::time::Duration;

    fn event(n: usize) -> StoreEvent {
        StoreEvent::saved_link(Link::new("p", format!("m{n}"), "init"))
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe(4);
        let mut b = bus.subscribe(4);

        bus.emit(event(1)).await;
        bus.emit(event(2)).await;

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap(), event(1));
            assert_eq!(rx.recv().await.unwrap(), event(2));
        }
    }

    #[tokio::test]
    async fn test_full_channel_blocks_producer() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(1);
        bus.emit(event(1)).await;

        let producer = bus.clone();
        let blocked = tokio::spawn(async move { producer.emit(event(2)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap(), event(1));
        blocked.await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), event(2));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(1);
        let mut live = bus.subscribe(4);
        drop(rx);

        bus.emit(event(1)).await;
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(live.recv().await.unwrap(), event(1));
    }

    #[tokio::test]
    async fn test_late_subscriber_only_sees_later_events() {
        let bus = EventBus::new();
        bus.emit(event(1)).await;
        let mut rx = bus.subscribe(4);
        bus.emit(event(2)).await;
        assert_eq!(rx.recv().await.unwrap(), event(2));
        assert!(rx.try_recv().is_err());
    }
}
