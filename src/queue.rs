//! Unbounded async FIFO and single-settlement signals.
//!
//! [`BlockingQueue`] decouples the arrival of transport events from their
//! consumption: producers push without suspending, consumers suspend in
//! [`BlockingQueue::pop`] until an item is available. Outstanding pops are
//! served strictly in call order.
//!
//! [`Signal`] is built on top of the queue and models a value that settles
//! exactly once (close event, first error, handshake response) and can be
//! awaited by any number of tasks.
//!
//! # Cancellation
//!
//! A [`Pop`] future may be dropped at any point, typically because it lost
//! a `select!` race. If an item was already handed to it, the item is
//! returned to the head of the queue, so no message is ever lost.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{OnceCell, oneshot};

// ============================================================================
// BlockingQueue
// ============================================================================

/// Unbounded, order-preserving async queue.
///
/// # Example
///
/// ```ignore
/// let queue = BlockingQueue::new();
/// queue.push("a");
/// queue.push("b");
/// assert_eq!(queue.pop().await, "a");
/// ```
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    /// Items not yet consumed.
    items: VecDeque<T>,
    /// Consumers waiting for an item, oldest first.
    waiters: VecDeque<oneshot::Sender<T>>,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Appends an item without suspending.
    ///
    /// Hands the item to the oldest live waiter if there is one.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if let Some(item) = Self::hand_to_waiter(&mut state, item) {
            state.items.push_back(item);
        }
    }

    /// Returns a future resolving to the oldest unconsumed item.
    pub fn pop(&self) -> Pop<'_, T> {
        let mut state = self.state.lock();

        if let Some(item) = state.items.pop_front() {
            return Pop {
                queue: self,
                state: PopState::Ready(Some(item)),
            };
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);

        Pop {
            queue: self,
            state: PopState::Waiting(rx),
        }
    }

    /// Removes the oldest item if one is immediately available.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Returns the number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Puts an item taken by a cancelled pop back at the head.
    fn restore(&self, item: T) {
        let mut state = self.state.lock();
        if let Some(item) = Self::hand_to_waiter(&mut state, item) {
            state.items.push_front(item);
        }
    }

    /// Gives `item` to the first waiter still listening.
    ///
    /// Returns the item back when every waiter has gone away.
    fn hand_to_waiter(state: &mut QueueState<T>, mut item: T) -> Option<T> {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return None,
                Err(returned) => item = returned,
            }
        }
        Some(item)
    }
}

// ============================================================================
// Pop
// ============================================================================

/// Future returned by [`BlockingQueue::pop`].
#[must_use = "futures do nothing unless polled"]
pub struct Pop<'a, T> {
    queue: &'a BlockingQueue<T>,
    state: PopState<T>,
}

// `T` is moved out, never pinned.
impl<T> Unpin for Pop<'_, T> {}

enum PopState<T> {
    Ready(Option<T>),
    Waiting(oneshot::Receiver<T>),
}

impl<T> Future for Pop<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = Pin::into_inner(self);

        match &mut this.state {
            PopState::Ready(item) => match item.take() {
                Some(item) => Poll::Ready(item),
                None => Poll::Pending,
            },
            PopState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(item)) => {
                    this.state = PopState::Ready(None);
                    Poll::Ready(item)
                }
                // Senders live inside the queue, which this future borrows.
                Poll::Ready(Err(_)) | Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T> Drop for Pop<'_, T> {
    fn drop(&mut self) {
        match &mut self.state {
            PopState::Ready(item) => {
                if let Some(item) = item.take() {
                    self.queue.restore(item);
                }
            }
            PopState::Waiting(rx) => {
                rx.close();
                if let Ok(item) = rx.try_recv() {
                    self.queue.restore(item);
                }
            }
        }
    }
}

// ============================================================================
// Signal
// ============================================================================

/// A value that settles at most once and can be awaited many times.
///
/// The first [`Signal::settle`] wins; later calls are ignored. Every
/// [`Signal::wait`] resolves to a clone of the settled value.
pub struct Signal<T> {
    queue: BlockingQueue<T>,
    value: OnceCell<T>,
    snapshot: Mutex<Option<T>>,
    settled: AtomicBool,
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Signal<T> {
    /// Creates an unsettled signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: BlockingQueue::new(),
            value: OnceCell::new(),
            snapshot: Mutex::new(None),
            settled: AtomicBool::new(false),
        }
    }

    /// Settles the signal with `value`.
    ///
    /// Returns `false` if the signal was already settled.
    pub fn settle(&self, value: T) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.snapshot.lock() = Some(value.clone());
        self.queue.push(value);
        true
    }

    /// Waits until the signal settles and returns its value.
    pub async fn wait(&self) -> T {
        self.value
            .get_or_init(|| self.queue.pop())
            .await
            .clone()
    }

    /// Returns `true` once [`Signal::settle`] has been called.
    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Returns the value if it settled, without suspending.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.snapshot.lock().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_pop_ready_when_buffered() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);

        let mut first = task::spawn(queue.pop());
        assert_ready_eq!(first.poll(), 1);
        drop(first);

        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_suspends_until_push() {
        let queue = BlockingQueue::new();
        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        queue.push("hello");
        assert!(pop.is_woken());
        assert_ready_eq!(pop.poll(), "hello");
    }

    #[test]
    fn test_waiters_served_in_call_order() {
        let queue = BlockingQueue::new();
        let mut first = task::spawn(queue.pop());
        let mut second = task::spawn(queue.pop());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        queue.push("a");
        queue.push("b");

        assert_ready_eq!(second.poll(), "b");
        assert_ready_eq!(first.poll(), "a");
    }

    #[test]
    fn test_dropped_pop_does_not_lose_item() {
        let queue = BlockingQueue::new();
        let mut pop = task::spawn(queue.pop());
        assert_pending!(pop.poll());

        // Item is handed to the waiter, which is then cancelled.
        queue.push(7);
        drop(pop);

        assert_eq!(queue.try_pop(), Some(7));
    }

    #[test]
    fn test_cancelled_item_goes_to_next_waiter() {
        let queue = BlockingQueue::new();
        let mut first = task::spawn(queue.pop());
        let mut second = task::spawn(queue.pop());
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        queue.push(1);
        drop(first);

        assert_ready_eq!(second.poll(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dropped_ready_pop_restores_head() {
        let queue = BlockingQueue::new();
        queue.push(1);
        queue.push(2);

        let pop = queue.pop();
        drop(pop);

        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_pop_across_tasks() {
        let queue = Arc::new(BlockingQueue::new());

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                let mut received = Vec::new();
                for _ in 0..3 {
                    received.push(queue.pop().await);
                }
                received
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        for i in 0..3 {
            queue.push(i);
        }

        assert_eq!(consumer.await.unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_signal_settles_once() {
        let signal = Signal::new();
        assert!(!signal.is_settled());
        assert!(signal.settle(1000u16));
        assert!(!signal.settle(1001u16));
        assert!(signal.is_settled());
        assert_eq!(signal.peek(), Some(1000));
        assert_eq!(signal.peek(), Some(1000));
    }

    #[tokio::test]
    async fn test_signal_many_waiters() {
        let signal = Arc::new(Signal::<String>::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = Arc::clone(&signal);
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.settle("closed".to_string());

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), "closed");
        }
        assert_eq!(signal.wait().await, "closed");
    }

    #[test]
    fn test_signal_peek_unsettled() {
        let signal = Signal::<u8>::new();
        assert_eq!(signal.peek(), None);
    }

    proptest! {
        #[test]
        fn prop_pop_preserves_push_order(items in proptest::collection::vec(any::<u32>(), 0..64)) {
            let queue = BlockingQueue::new();
            for item in &items {
                queue.push(*item);
            }

            let mut popped = Vec::with_capacity(items.len());
            for _ in 0..items.len() {
                let mut pop = task::spawn(queue.pop());
                match pop.poll() {
                    Poll::Ready(item) => popped.push(item),
                    Poll::Pending => prop_assert!(false, "pop pending with buffered items"),
                }
            }

            prop_assert_eq!(popped, items);
        }

        #[test]
        fn prop_waiters_preserve_push_order(items in proptest::collection::vec(any::<u8>(), 1..16)) {
            let queue = BlockingQueue::new();
            let mut pops: Vec<_> = items.iter().map(|_| task::spawn(queue.pop())).collect();
            for pop in &mut pops {
                prop_assert!(pop.poll().is_pending());
            }

            for item in &items {
                queue.push(*item);
            }

            for (pop, expected) in pops.iter_mut().zip(&items) {
                prop_assert_eq!(pop.poll(), Poll::Ready(*expected));
            }
        }
    }
}
