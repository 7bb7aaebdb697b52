use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque handle identifying one remote party, issued by the transport.
pub type ConnectionHandle = u64;

/// An event delivered by the external transport. Frames are reliable,
/// ordered and already de-fragmented.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected(ConnectionHandle),
    Disconnected(ConnectionHandle),
    Data(ConnectionHandle, Box<[u8]>),
}

/// The single synchronization point between transport worker threads and
/// the simulation thread. Workers push events from any thread; the sync
/// manager drains the queue fully at the start of every tick.
#[derive(Clone, Default)]
pub struct TransportEventQueue {
    inner: Arc<Mutex<VecDeque<TransportEvent>>>,
}

impl TransportEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: TransportEvent) {
        // The queue holds plain data, so a panic in one transport worker
        // must not poison it for everyone else.
        let mut queue = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queue.push_back(event);
    }

    /// Takes every queued event, preserving arrival order. Events for the
    /// same connection are therefore processed in the order they were
    /// enqueued.
    pub fn drain(&self) -> Vec<TransportEvent> {
        let mut queue = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        queue.drain(..).collect()
    }
}

/// Outbound send primitive provided by the external transport. A payload
/// handed to `send` is one complete frame.
pub trait Transport {
    fn send(&mut self, connection: ConnectionHandle, payload: &[u8]);
}

#[cfg(test)]
mod tests {
    use super::{TransportEvent, TransportEventQueue};

    #[test]
    fn drain_preserves_order() {
        let queue = TransportEventQueue::new();
        queue.push(TransportEvent::Connected(1));
        queue.push(TransportEvent::Data(1, vec![0xAB].into_boxed_slice()));
        queue.push(TransportEvent::Disconnected(1));
        let events = queue.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TransportEvent::Connected(1)));
        assert!(matches!(events[1], TransportEvent::Data(1, _)));
        assert!(matches!(events[2], TransportEvent::Disconnected(1)));
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn survives_a_worker_panicking_with_the_lock_held() {
        let queue = TransportEventQueue::new();
        queue.push(TransportEvent::Connected(1));

        let poisoner = queue.clone();
        std::thread::spawn(move || {
            let _guard = poisoner.inner.lock().unwrap();
            panic!("worker died");
        })
        .join()
        .unwrap_err();

        queue.push(TransportEvent::Connected(2));
        assert_eq!(queue.drain().len(), 2);
    }
}
