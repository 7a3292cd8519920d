//! Waiter wake-up abstraction.
//!
//! A `Notifier` lets producers of completions (worker threads) wake the
//! single thread blocked in a backend's `wait()`, and lets shutdown wake
//! it early.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (Linux): writes 1 to an eventfd; the waiter polls
//!   it with a timeout and drains the counter.
//!
//! - `CondvarNotifier` (fallback): a pending counter behind a mutex and
//!   a condition variable.

use crate::error::Result;
use std::time::Duration;

/// Wakes a thread blocked waiting for completions.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the waiter wakes may be coalesced
///   (eventfd semantics: counter increments, one read drains).
/// - `wait()` returns `true` if a notification was consumed, `false` on
///   timeout. Callers re-check their queue regardless.
pub trait Notifier: Send + Sync {
    /// Signal that new completions (or a shutdown request) are available.
    fn notify(&self) -> Result<()>;

    /// Block until notified or `timeout` elapses. `None` waits forever.
    fn wait(&self, timeout: Option<Duration>) -> bool;
}
