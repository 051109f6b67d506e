//! One-shot wakeup token (spec §4.2).
//!
//! A consumer that wants to block until "something happened" calls
//! [`EventCount::prepare`], rechecks its condition, and if still unsatisfied
//! calls [`EventCount::wait`] on the token it prepared. Producers call
//! [`EventCount::broadcast`] after every state change that a waiter might
//! care about. The double-check idiom this is meant to support:
//!
//! ```ignore
//! if queue.is_empty() {
//!     let token = event_count.prepare();
//!     if queue.is_empty() {
//!         event_count.wait(token);
//!     } else {
//!         event_count.cancel(token);
//!     }
//! }
//! ```
//!
//! Implemented with `parking_lot::{Mutex, Condvar}` over a generation
//! counter, matching the lock/guard style the teacher uses throughout
//! `primitives::concurrency` rather than a hand-rolled futex.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A token returned by [`EventCount::prepare`]; redeem it with
/// [`EventCount::wait`] or discard it with [`EventCount::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventToken(u64);

/// A one-shot wakeup broadcaster.
///
/// Contract: if a `broadcast` happens-before a subsequent `prepare`, that
/// `prepare`'s `wait` returns immediately (the generation it captured is
/// already stale).
#[derive(Default)]
pub struct EventCount {
    state: Mutex<u64>,
    condvar: Condvar,
}

impl EventCount {
    /// Creates a fresh event count at generation 0.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Snapshots the current generation as a token to wait on.
    pub fn prepare(&self) -> EventToken {
        EventToken(*self.state.lock())
    }

    /// Discards a token without sleeping. No-op: the token owns no
    /// resources beyond the generation number it captured.
    pub fn cancel(&self, _token: EventToken) {}

    /// Blocks until the generation advances past `token.0`, i.e. until a
    /// `broadcast` has happened since the matching `prepare`.
    pub fn wait(&self, token: EventToken) {
        let mut guard = self.state.lock();
        while *guard == token.0 {
            self.condvar.wait(&mut guard);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning
    /// `true` if woken by a broadcast and `false` on timeout.
    pub fn wait_timeout(&self, token: EventToken, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock();
        while *guard == token.0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let result = self.condvar.wait_for(&mut guard, deadline - now);
            if result.timed_out() && *guard == token.0 {
                return false;
            }
        }
        true
    }

    /// Advances the generation and wakes every waiter.
    pub fn broadcast(&self) {
        let mut guard = self.state.lock();
        *guard = guard.wrapping_add(1);
        self.condvar.notify_all();
    }
}
