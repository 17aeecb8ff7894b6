//! Driving futures without an executor.
//!
//! The channel and select futures only need a working [`Waker`]; these
//! helpers supply one backed by the current thread (a condvar park) or by
//! nothing at all ([`poll_now`], for probing readiness in tests).

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

/// Condvar-backed thread parker usable as a [`Waker`].
struct ThreadParker {
    notified: Mutex<bool>,
    condvar: Condvar,
}

impl ThreadParker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            notified: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    fn park(&self) {
        let mut notified = self.notified.lock();
        while !*notified {
            self.condvar.wait(&mut notified);
        }
        *notified = false;
    }

    /// Parks until woken or `deadline`; returns whether a wake arrived.
    fn park_until(&self, deadline: Instant) -> bool {
        let mut notified = self.notified.lock();
        while !*notified {
            if self.condvar.wait_until(&mut notified, deadline).timed_out() {
                let woken = *notified;
                *notified = false;
                return woken;
            }
        }
        *notified = false;
        true
    }
}

impl Wake for ThreadParker {
    fn wake(self: Arc<Self>) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.condvar.notify_one();
    }
}

/// Blocks the current thread until the future resolves.
pub fn block_on<F: Future>(future: F) -> F::Output {
    let parker = ThreadParker::new();
    let waker = Waker::from(Arc::clone(&parker));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => parker.park(),
        }
    }
}

/// Blocks the current thread until the future resolves or the timeout
/// elapses; `None` on timeout. The future is dropped on timeout, which
/// cancels a parked channel operation cleanly.
pub fn block_on_timeout<F: Future>(future: F, timeout: Duration) -> Option<F::Output> {
    let deadline = Instant::now() + timeout;
    let parker = ThreadParker::new();
    let waker = Waker::from(Arc::clone(&parker));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return Some(output),
            Poll::Pending => {
                if !parker.park_until(deadline) {
                    return None;
                }
            }
        }
    }
}

/// Polls the future exactly once with a no-op waker.
///
/// Useful for asserting that an operation parks. The wake that would resume
/// the future is discarded, so a `Pending` future must be re-driven with
/// [`block_on`] (channel futures re-register their waker on every poll).
pub fn poll_now<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
    struct NoopWaker;
    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    let waker = Waker::from(Arc::new(NoopWaker));
    let mut cx = Context::from_waker(&waker);
    Pin::new(future).poll(&mut cx)
}
