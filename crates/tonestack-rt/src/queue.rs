//! Bounded lock-free queues carrying control commands to the audio thread.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
}

/// A bounded lock-free queue between control threads and the audio thread.
///
/// Producers call [`EventQueue::try_push`] from any thread; the audio thread
/// drains with [`EventQueue::try_pop`] at the top of each period. Capacity is
/// fixed at construction so neither side ever allocates.
pub struct EventQueue<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<T> EventQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
        }
    }

    pub fn try_push(&self, value: T) -> Result<(), QueueError> {
        self.queue.push(value).map_err(|_| QueueError::Full)
    }

    /// Like [`EventQueue::try_push`], but hands the value back when the
    /// queue is full so the caller can dispose of it properly.
    pub fn push(&self, value: T) -> Result<(), T> {
        self.queue.push(value)
    }

    pub fn try_pop(&self) -> Result<T, QueueError> {
        self.queue.pop().ok_or(QueueError::Empty)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
