//! Unbounded hand-off queue between the acquirer and the recorder.
//!
//! Multi-producer, multi-consumer, FIFO. Enqueueing never blocks and never fails
//! for lack of capacity; dequeueing waits for at most a caller-supplied timeout so
//! that consumers stay responsive to shutdown.
//!
//! Both halves are cheaply clonable. The queue also tracks how many
//! [`HandoffSender`]s are alive, which lets a consumer tell "empty for now" apart
//! from "empty and no producer can add anything anymore".

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};

/// Queue state shared by every handle.
///
/// The semaphore counts items that can be popped: a push is followed by
/// exactly one permit, and a consumer pops only after forgetting one. Once the
/// last sender is gone the semaphore is closed and consumers pop directly, so
/// nothing already queued is stranded.
struct Shared<T> {
    /// Lock-free FIFO of queued items
    items: SegQueue<T>,
    /// Permits = items available to consumers
    available: Semaphore,
    /// Live `HandoffSender`s
    senders: AtomicUsize,
}

impl<T> Shared<T> {
    /// Pops after the producers are gone; the permits no longer matter.
    fn pop_closed(&self) -> Option<T> {
        self.items.pop()
    }
}

/// Creates a new, empty hand-off queue.
pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let shared = Arc::new(Shared {
        items: SegQueue::new(),
        available: Semaphore::new(0),
        senders: AtomicUsize::new(1),
    });
    (
        HandoffSender {
            shared: shared.clone(),
        },
        HandoffReceiver { shared },
    )
}

/// Producer half of the queue.
pub struct HandoffSender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffSender<T> {
    /// Appends an item. Never blocks.
    pub fn enqueue(&self, item: T) {
        self.shared.items.push(item);
        self.shared.available.add_permits(1);
    }

    /// Number of items waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.shared.items.len()
    }

    /// Whether no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.shared.items.is_empty()
    }
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for HandoffSender<T> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Wakes every waiting consumer
            self.shared.available.close();
        }
    }
}

/// Consumer half of the queue.
pub struct HandoffReceiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> HandoffReceiver<T> {
    /// Removes the oldest item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        match self.shared.available.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.shared.items.pop()
            }
            Err(TryAcquireError::Closed) => self.shared.pop_closed(),
            Err(TryAcquireError::NoPermits) => None,
        }
    }

    /// Removes the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout, or earlier once the queue is empty and the
    /// last sender has been dropped.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        match tokio::time::timeout(timeout, self.shared.available.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                self.shared.items.pop()
            }
            Ok(Err(_)) => self.shared.pop_closed(),
            Err(_) => None,
        }
    }

    /// Number of items waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.shared.items.len()
    }

    /// Whether no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.shared.items.is_empty()
    }

    /// Whether any producer is still alive.
    pub fn has_senders(&self) -> bool {
        self.shared.senders.load(Ordering::SeqCst) > 0
    }
}

impl<T> Clone for HandoffReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
