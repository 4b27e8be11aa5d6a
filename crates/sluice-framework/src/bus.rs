//! The shared message bus between workers and the handler engine.
//!
//! Many producers, one consumer. The bus is unbounded: an emit never waits,
//! and messages are handed to the consumer in the order they were enqueued.

use std::sync::Arc;

use sluice_core::{DataMessage, Emitter};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Creates a connected sender/receiver pair.
pub fn channel() -> (BusSender, BusReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BusSender { tx }, BusReceiver { rx })
}

/// Producer side of the bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BusSender {
    tx: UnboundedSender<DataMessage>,
}

impl BusSender {
    /// Returns an emitter that tags every message with `origin`.
    pub fn emitter(&self, origin: impl Into<Arc<str>>) -> Emitter {
        Emitter::new(origin, self.tx.clone())
    }

    /// Enqueues an already built message.
    ///
    /// Returns the message back if the consumer is gone.
    pub fn send(&self, message: DataMessage) -> Result<(), DataMessage> {
        self.tx.send(message).map_err(|e| e.0)
    }

    /// Returns `true` once the consumer side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the bus.
#[derive(Debug)]
pub struct BusReceiver {
    rx: UnboundedReceiver<DataMessage>,
}

impl BusReceiver {
    /// Waits for the next message. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<DataMessage> {
        self.rx.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<DataMessage> {
        self.rx.try_recv().ok()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_across_producers() {
        let (tx, mut rx) = channel();
        let a = tx.emitter("a");
        let b = tx.emitter("b");

        a.emit("1");
        b.emit("2");
        a.emit("3");

        let order: Vec<(String, Vec<u8>)> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .flatten()
            .map(|m| (m.origin().to_string(), m.into_payload()))
            .collect();

        assert_eq!(
            order,
            vec![
                ("a".to_string(), b"1".to_vec()),
                ("b".to_string(), b"2".to_vec()),
                ("a".to_string(), b"3".to_vec()),
            ]
        );
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_receiver_ends_when_senders_dropped() {
        let (tx, mut rx) = channel();
        tx.send(DataMessage::new("a", "x")).unwrap();
        drop(tx);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
