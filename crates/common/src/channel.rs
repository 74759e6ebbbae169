//! Ordered event queues between native threads and the consumer
//!
//! Producers are arbitrary threads (native engine workers, the USB hotplug
//! thread) and use the blocking send; the single consumer either awaits on
//! the Tokio runtime or blocks on a plain thread. Queues preserve arrival
//! order, never coalesce and never drop: a full bounded queue applies
//! backpressure to the producer instead.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, unbounded};

/// Default capacity for bounded session event queues
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Producer half of an event queue
pub struct EventSender<T> {
    tx: Sender<T>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> std::fmt::Debug for EventSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("len", &self.tx.len())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T> EventSender<T> {
    /// Send an event from a non-async thread, waiting for room if full
    pub fn send_blocking(&self, event: T) -> crate::Result<()> {
        self.tx
            .send_blocking(event)
            .map_err(|_| crate::Error::Channel("event queue closed".to_string()))
    }

    /// Send an event from async context
    pub async fn send(&self, event: T) -> crate::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| crate::Error::Channel("event queue closed".to_string()))
    }

    /// Send without waiting; returns the event back if the queue is full
    pub fn try_send(&self, event: T) -> Result<(), TrySend<T>> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => TrySend::Full(event),
            TrySendError::Closed(event) => TrySend::Closed(event),
        })
    }

    /// Close the queue for every producer; queued events stay receivable
    pub fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Why a `try_send` did not enqueue
#[derive(Debug)]
pub enum TrySend<T> {
    Full(T),
    Closed(T),
}

/// Consumer half of an event queue
///
/// Not `Clone`: exactly one consumer drains a queue.
pub struct EventReceiver<T> {
    rx: Receiver<T>,
}

impl<T> std::fmt::Debug for EventReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("len", &self.rx.len())
            .field("closed", &self.rx.is_closed())
            .finish()
    }
}

impl<T> EventReceiver<T> {
    /// Receive the next event; `None` once closed and drained
    pub async fn recv(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    /// Blocking receive for non-async consumers
    pub fn recv_blocking(&self) -> Option<T> {
        self.rx.recv_blocking().ok()
    }

    /// Non-blocking receive
    pub fn try_recv(&self) -> Polled<T> {
        match self.rx.try_recv() {
            Ok(event) => Polled::Ready(event),
            Err(TryRecvError::Empty) => Polled::Empty,
            Err(TryRecvError::Closed) => Polled::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Result of a non-blocking receive
#[derive(Debug, PartialEq, Eq)]
pub enum Polled<T> {
    Ready(T),
    Empty,
    Closed,
}

/// Create a bounded event queue
pub fn event_queue<T>(capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

/// Create an unbounded event queue for low-rate notifications
pub fn unbounded_event_queue<T>() -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order_across_threads() {
        let (tx, rx) = event_queue::<u32>(4);

        let producer = thread::spawn(move || {
            for i in 0..100 {
                tx.send_blocking(i).unwrap();
            }
        });

        let received: Vec<u32> = (0..100).filter_map(|_| rx.recv_blocking()).collect();
        producer.join().unwrap();

        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_drains_after_senders_dropped() {
        let (tx, rx) = event_queue::<&str>(8);
        tx.send_blocking("a").unwrap();
        tx.send_blocking("b").unwrap();
        drop(tx);

        assert_eq!(rx.try_recv(), Polled::Ready("a"));
        assert_eq!(rx.recv_blocking(), Some("b"));
        assert_eq!(rx.try_recv(), Polled::Closed);
        assert_eq!(rx.recv_blocking(), None);
    }

    #[test]
    fn test_try_send_full() {
        let (tx, _rx) = event_queue::<u8>(1);
        assert!(tx.try_send(1).is_ok());
        assert!(matches!(tx.try_send(2), Err(TrySend::Full(2))));
    }

    #[test]
    fn test_send_after_close_fails() {
        let (tx, rx) = event_queue::<u8>(2);
        tx.send_blocking(7).unwrap();
        assert!(tx.close());
        assert!(tx.send_blocking(8).is_err());
        assert_eq!(rx.recv_blocking(), Some(7));
        assert_eq!(rx.recv_blocking(), None);
    }

    #[tokio::test]
    async fn test_async_recv() {
        let (tx, rx) = unbounded_event_queue::<u32>();
        thread::spawn(move || {
            tx.send_blocking(1).unwrap();
            tx.send_blocking(2).unwrap();
        });

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }
}
