//! Intrusive-style FIFO of waiters, each carrying a callback (spec §4.3).
//!
//! The original is an intrusive linked list threaded through the waiter
//! structs themselves. The idiomatic Rust rendition (per `DESIGN NOTES`
//! §9, "intrusive linked lists") drops the `container_of` trick in favor of
//! a plain `VecDeque` behind a lock, matching the teacher's own use of
//! `VecDeque` plus boxed callables in `primitives/pager/pager.rs`.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A single queued waiter: an opaque context plus the callback that should
/// run when it is dequeued.
pub struct Waiter<T> {
    context: T,
}

impl<T> Waiter<T> {
    /// Wraps a context value as a waiter.
    pub fn new(context: T) -> Self {
        Self { context }
    }

    /// Consumes the waiter, returning its context.
    pub fn into_context(self) -> T {
        self.context
    }
}

/// FIFO queue of waiters. `notify_next`/`notify_all` take the invocation
/// callback at call time (rather than storing it per-waiter) so one queue
/// can serve callers that notify with different callbacks at different
/// points in its lifetime, e.g. a dirty-block queue drained once by a
/// normal write pass and once by a drain-time discard pass.
pub struct WaitQueue<T> {
    waiters: Mutex<VecDeque<Waiter<T>>>,
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> WaitQueue<T> {
    /// Creates an empty wait queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a waiter. Callers must not enqueue the same logical waiter
    /// twice concurrently (spec §4.3).
    pub fn enqueue(&self, context: T) {
        self.waiters.lock().push_back(Waiter::new(context));
    }

    /// Dequeues the head waiter and invokes `callback` with its context.
    /// Returns `false` if the queue was empty.
    pub fn notify_next(&self, callback: impl FnOnce(T)) -> bool {
        let head = self.waiters.lock().pop_front();
        match head {
            Some(waiter) => {
                callback(waiter.into_context());
                true
            }
            None => false,
        }
    }

    /// Repeatedly dequeues and invokes `callback` until the queue is empty.
    pub fn notify_all(&self, mut callback: impl FnMut(T)) {
        loop {
            let head = self.waiters.lock().pop_front();
            match head {
                Some(waiter) => callback(waiter.into_context()),
                None => break,
            }
        }
    }

    /// Concatenates `self`'s waiters onto the end of `dst`, leaving `self`
    /// empty. O(1) amortized via `VecDeque::append`.
    pub fn transfer_all(&self, dst: &WaitQueue<T>) {
        let mut src_guard = self.waiters.lock();
        let mut dst_guard = dst.waiters.lock();
        dst_guard.append(&mut src_guard);
    }

    /// Number of waiters currently queued.
    pub fn count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// True iff at least one waiter is queued.
    pub fn has_waiters(&self) -> bool {
        !self.waiters.lock().is_empty()
    }
}

impl<T: Clone + PartialEq> WaitQueue<T> {
    /// Returns the head waiter's context without dequeuing it (spec §4.3
    /// "iteration via `get_first`/`get_next`").
    pub fn get_first(&self) -> Option<T> {
        self.waiters.lock().front().map(|w| w.context.clone())
    }

    /// Returns the context of the waiter immediately after `current`,
    /// without dequeuing anything. Paired with [`WaitQueue::get_first`]
    /// to walk the queue front to back while it may still be mutated by
    /// `enqueue`/`notify_next` between calls.
    pub fn get_next(&self, current: &T) -> Option<T> {
        let guard = self.waiters.lock();
        let mut iter = guard.iter();
        iter.find(|w| &w.context == current)?;
        iter.next().map(|w| w.context.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_next_is_fifo() {
        let q: WaitQueue<u32> = WaitQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        let mut seen = Vec::new();
        assert!(q.notify_next(|v| seen.push(v)));
        assert!(q.notify_next(|v| seen.push(v)));
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(q.count(), 1);
    }

    #[test]
    fn notify_next_on_empty_returns_false() {
        let q: WaitQueue<u32> = WaitQueue::new();
        assert!(!q.notify_next(|_| {}));
    }

    #[test]
    fn notify_all_drains_everything() {
        let q: WaitQueue<u32> = WaitQueue::new();
        for v in 0..5 {
            q.enqueue(v);
        }
        let mut seen = Vec::new();
        q.notify_all(|v| seen.push(v));
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(!q.has_waiters());
    }

    #[test]
    fn get_first_and_get_next_walk_without_dequeuing() {
        let q: WaitQueue<u32> = WaitQueue::new();
        q.enqueue(10);
        q.enqueue(20);
        q.enqueue(30);

        let first = q.get_first().unwrap();
        assert_eq!(first, 10);
        let second = q.get_next(&first).unwrap();
        assert_eq!(second, 20);
        let third = q.get_next(&second).unwrap();
        assert_eq!(third, 30);
        assert!(q.get_next(&third).is_none());

        // Nothing was dequeued by walking.
        assert_eq!(q.count(), 3);
    }

    #[test]
    fn transfer_all_preserves_order_and_empties_source() {
        let src: WaitQueue<u32> = WaitQueue::new();
        let dst: WaitQueue<u32> = WaitQueue::new();
        dst.enqueue(100);
        src.enqueue(1);
        src.enqueue(2);
        src.transfer_all(&dst);
        assert!(!src.has_waiters());
        let mut seen = Vec::new();
        dst.notify_all(|v| seen.push(v));
        assert_eq!(seen, vec![100, 1, 2]);
    }
}
