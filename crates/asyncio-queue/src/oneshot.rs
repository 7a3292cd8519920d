//! Single-use channel that resumes one waiter with one value.
//!
//! The poll thread holds the `Sender`; the caller holds the `Receiver`,
//! which is both a `Future` and blockable from a plain thread. `send`
//! consumes the sender, so a value is delivered at most once. Dropping the
//! sender unsent closes the channel and the receiver yields `None`.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct State<T> {
    value: Option<T>,
    /// Set when the sender is gone, whether it sent or not.
    closed: bool,
    waker: Option<Waker>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            value: None,
            closed: false,
            waker: None,
        }),
        cond: Condvar::new(),
    });
    (Sender { inner: Arc::clone(&inner) }, Receiver { inner })
}

impl<T> Sender<T> {
    /// Deliver the value and wake the receiver.
    pub fn send(self, value: T) {
        self.inner.lock().value = Some(value);
        // Drop does the close + wake.
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let waker = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.waker.take()
        };
        self.inner.cond.notify_all();
        // Wake outside the lock; the executor may poll inline.
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Receiver<T> {
    /// Non-blocking check. `Some` once the value has arrived.
    pub fn try_recv(&mut self) -> Option<T> {
        self.inner.lock().value.take()
    }

    /// True once the sender has sent or been dropped.
    pub fn is_resolved(&self) -> bool {
        self.inner.lock().closed
    }

    /// Park the calling OS thread until the sender is gone.
    pub fn recv_blocking(self) -> Option<T> {
        let mut state = self.inner.lock();
        while !state.closed {
            state = self.inner.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.value.take()
    }

    /// `recv_blocking` with a deadline. `Err(self)` on timeout so the
    /// caller can keep waiting.
    pub fn recv_timeout(self, timeout: Duration) -> Result<Option<T>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.inner.lock();
            while !state.closed {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = self
                    .inner
                    .cond
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(|e| e.into_inner());
                state = guard;
            }
            if state.closed {
                return Ok(state.value.take());
            }
        }
        Err(self)
    }
}

impl<T> Future for Receiver<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.lock();
        if let Some(value) = state.value.take() {
            return Poll::Ready(Some(value));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        match &state.waker {
            Some(w) if w.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

// Receiver<T> is Unpin: it only holds an Arc.

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_send_then_recv() {
        let (tx, rx) = channel();
        tx.send(7u32);
        assert!(rx.is_resolved());
        assert_eq!(rx.recv_blocking(), Some(7));
    }

    #[test]
    fn test_dropped_sender_yields_none() {
        let (tx, rx) = channel::<u32>();
        drop(tx);
        assert_eq!(rx.recv_blocking(), None);
    }

    #[test]
    fn test_cross_thread() {
        let (tx, rx) = channel();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(String::from("done"));
        });
        assert_eq!(rx.recv_blocking().as_deref(), Some("done"));
        h.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_returns_receiver() {
        let (tx, rx) = channel::<u8>();
        let rx = rx.recv_timeout(Duration::from_millis(10)).unwrap_err();
        tx.send(1);
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).ok(), Some(Some(1)));
    }

    #[test]
    fn test_try_recv() {
        let (tx, mut rx) = channel();
        assert_eq!(rx.try_recv(), None);
        tx.send(3);
        assert_eq!(rx.try_recv(), Some(3));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_await_from_tokio() {
        let (tx, rx) = channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(42u64);
        });
        assert_eq!(rx.await, Some(42));
    }
}
