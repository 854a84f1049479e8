//! Waitable FIFO.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Unbounded single-producer/multi-consumer FIFO with an asynchronous
/// non-empty wait.
///
/// `push` wakes every waiter parked in [`pop`](Self::pop) or
/// [`non_empty`](Self::non_empty) at that moment, in registration order;
/// waiters that arrive after the push wait for the next one (they still
/// observe queued items through the state check).
pub struct AwaitableQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for AwaitableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AwaitableQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append an item and wake all current waiters. Never blocks.
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Remove and return the front item if one exists.
    pub fn pop_now(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Remove and return the front item, waiting until one exists.
    pub async fn pop(&self) -> T {
        loop {
            // Register before checking, so a push between the check and the
            // await is not lost.
            let notified = self.notify.notified();
            if let Some(item) = self.pop_now() {
                return item;
            }
            notified.await;
        }
    }

    /// Wait until the queue is non-empty without removing anything.
    pub async fn non_empty(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn push_pop_now_fifo() {
        let queue = AwaitableQueue::new();
        assert!(queue.is_empty());
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_now(), Some(1));
        assert_eq!(queue.pop_now(), Some(2));
        assert_eq!(queue.pop_now(), Some(3));
        assert_eq!(queue.pop_now(), None);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let queue = Arc::new(AwaitableQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });
        // Let the waiter park before pushing.
        tokio::task::yield_now().await;
        queue.push(7u32);
        assert_eq!(waiter.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn push_wakes_all_non_empty_waiters_in_order() {
        let queue = Arc::new(AwaitableQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue.non_empty().await;
                order.lock().push(i);
            }));
            // Park the waiters one at a time so registration order is fixed.
            tokio::task::yield_now().await;
        }

        queue.push(());
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        // non_empty does not consume.
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn late_waiter_sees_state_not_edge() {
        let queue = Arc::new(AwaitableQueue::new());
        queue.push(1u32);
        assert_eq!(queue.pop().await, 1);

        // Queue drained: a fresh waiter must wait for the next push.
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        queue.push(2);
        assert_eq!(waiter.await.unwrap(), 2);
    }
}
