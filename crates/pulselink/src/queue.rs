use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Poll-based FIFO of application messages.
///
/// Cloning the queue clones a handle to the same storage, which is how handlers and
/// application threads stage messages for a connection owned by a service thread.
///
/// Current behavior:
/// - `enqueue` never blocks and never rejects, even after invalidation.
/// - `dequeue` never blocks; it returns `None` when the queue is empty.
/// - No depth limit is enforced here. The owning connection compares `count()` against
///   its configured maximum once per tick and invalidates itself when it is exceeded.
pub struct MessageQueue<M> {
    inner: Arc<Inner<M>>,
}

struct Inner<M> {
    messages: Mutex<VecDeque<M>>,
    invalidation: Mutex<Option<String>>,
}

impl<M> MessageQueue<M> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                messages: Mutex::new(VecDeque::new()),
                invalidation: Mutex::new(None),
            }),
        }
    }

    /// Append `message` to the tail of the queue.
    pub fn enqueue(&self, message: M) {
        let mut messages = self.inner.messages.lock();
        messages.push_back(message);
        trace!(depth = messages.len(), "Message queued");
    }

    /// Pop the oldest message, if any.
    pub fn dequeue(&self) -> Option<M> {
        let mut messages = self.inner.messages.lock();
        let message = messages.pop_front()?;
        trace!(depth = messages.len(), "Message dequeued");
        Some(message)
    }

    /// Current depth.
    pub fn count(&self) -> usize {
        self.inner.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// True once the owning connection has been invalidated.
    ///
    /// Messages enqueued after this point will never be sent.
    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidation.lock().is_some()
    }

    pub fn invalidation_reason(&self) -> Option<String> {
        self.inner.invalidation.lock().clone()
    }

    /// Mark the queue as belonging to a dead connection. The first reason is kept.
    pub(crate) fn invalidate(&self, reason: &str) {
        let mut invalidation = self.inner.invalidation.lock();
        if invalidation.is_none() {
            *invalidation = Some(reason.to_string());
        }
    }

    /// True if both handles point at the same queue.
    pub fn same_queue(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<M> Clone for MessageQueue<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for MessageQueue<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("count", &self.count())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn dequeue_returns_oldest_first() {
        let queue = MessageQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.count(), 3);
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_has_no_depth_limit() {
        let queue = MessageQueue::new();
        for i in 0..10_000 {
            queue.enqueue(i);
        }
        assert_eq!(queue.count(), 10_000);
    }

    #[test]
    fn invalidation_keeps_first_reason_and_still_accepts_messages() {
        let queue = MessageQueue::new();
        assert!(!queue.is_invalidated());
        queue.invalidate("first");
        queue.invalidate("second");
        assert_eq!(queue.invalidation_reason().as_deref(), Some("first"));

        queue.enqueue("late");
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn clones_share_storage() {
        let queue = MessageQueue::new();
        let other = queue.clone();
        other.enqueue("x");
        assert!(queue.same_queue(&other));
        assert_eq!(queue.dequeue(), Some("x"));
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let queue = MessageQueue::new();
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue((p, i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(queue.count(), 1_000);

        // Per-producer order survives interleaving.
        let mut last = [None::<i32>; 4];
        while let Some((p, i)) = queue.dequeue() {
            if let Some(prev) = last[p] {
                assert!(i > prev);
            }
            last[p] = Some(i);
        }
    }
}
