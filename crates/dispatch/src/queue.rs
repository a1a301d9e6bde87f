//! Bounded FIFO job queue
//!
//! Multi-producer/multi-consumer. Pushing never blocks: a full or closed
//! queue hands the job straight back. Admission and closing are serialized
//! through the same lock, so nothing is admitted once the queue is closed.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Rejected push; the value is returned to the caller
#[derive(Debug)]
pub enum PushError<T> {
    /// Queue is at capacity
    Full(T),
    /// Queue has been closed
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected value
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO buffer
#[derive(Debug)]
pub struct JobQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    available: Notify,
}

impl<T> JobQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            available: Notify::new(),
        }
    }

    /// Enqueue without blocking
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PushError::Closed(item));
            }
            if inner.items.len() >= self.capacity {
                return Err(PushError::Full(item));
            }
            inner.items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item if there is one
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Wait for the next item
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a push in between still wakes us
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Close the queue and take every pending item
    ///
    /// Idempotent; later calls return an empty list.
    pub fn close(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.items.drain(..).collect()
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether there are no pending items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of pending items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a push would be rejected as full
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }
}
