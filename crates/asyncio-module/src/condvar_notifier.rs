//! `CondvarNotifier`: portable `Notifier` implementation.
//!
//! A pending-wakeup counter behind a mutex plus a condition variable.
//! Each `wait()` consumes one pending wakeup, so N notifications can wake
//! N different waiters. The pool backend's workers rely on that.

use asyncio_core::error::Result;
use asyncio_core::notifier::Notifier;

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct CondvarNotifier {
    pending: Mutex<u64>,
    condvar: Condvar,
}

impl CondvarNotifier {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Wake every waiter. Used at shutdown.
    pub fn notify_all(&self) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = pending.saturating_add(1);
        }
        self.condvar.notify_all();
    }
}

impl Default for CondvarNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for CondvarNotifier {
    fn notify(&self) -> Result<()> {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            *pending = pending.saturating_add(1);
        }
        self.condvar.notify_one();
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        while *pending == 0 {
            match deadline {
                None => {
                    pending = self.condvar.wait(pending).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self
                        .condvar
                        .wait_timeout(pending, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    pending = guard;
                }
            }
        }
        *pending -= 1;
        true
    }
}
