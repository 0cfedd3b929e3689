//! Bounded outgoing queue
//!
//! Many producers (any task calling `send`) feed exactly one consumer, the
//! session's writer task. Closing the queue wakes the consumer, discards
//! whatever is still buffered and fails every pending or later enqueue.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};

/// Reasons an enqueue is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Outgoing queue full")]
    Full,

    #[error("Outgoing queue closed")]
    Closed,
}

pub(crate) struct OutgoingQueue {
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    closed: AtomicBool,
    wake: Notify,
}

impl OutgoingQueue {
    /// Create a queue holding at most `capacity` payloads
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Enqueue, waiting for a free slot when the queue is full
    pub(crate) async fn push(&self, payload: String) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.tx.send(payload).await.map_err(|_| QueueError::Closed)
    }

    /// Enqueue without waiting
    pub(crate) fn try_push(&self, payload: String) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Wait for the next payload; `None` once the queue is closed
    pub(crate) async fn pop(&self) -> Option<String> {
        let mut rx = self.rx.lock().await;
        if self.is_closed() {
            Self::shut(&mut rx);
            return None;
        }

        tokio::select! {
            biased;
            _ = self.wake.notified() => {
                Self::shut(&mut rx);
                None
            }
            payload = rx.recv() => payload,
        }
    }

    /// Close the queue; idempotent
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake.notify_one();

        // The consumer shuts the receiver itself if it is mid-`pop`.
        if let Ok(mut rx) = self.rx.try_lock() {
            Self::shut(&mut rx);
        }
    }

    /// Close the queue and wait until everything buffered is discarded.
    ///
    /// Called by the consumer once it stops popping.
    pub(crate) async fn shutdown(&self) {
        self.close();
        Self::shut(&mut *self.rx.lock().await);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Payloads currently buffered
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    fn shut(rx: &mut mpsc::Receiver<String>) {
        rx.close();
        while rx.try_recv().is_ok() {}
    }
}
