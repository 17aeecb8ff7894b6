//! Cancellation signals.
//!
//! A [`CancelSource`] is the cancelling half: calling [`CancelSource::cancel`]
//! flips the flag exactly once and broadcasts the [`CancelReason`] to every
//! subscriber. A [`CancelSignal`] is the observable half handed to channel
//! operations and [`select`](crate::select): it exposes the flag, the reason,
//! and subscription with O(1) unsubscription.
//!
//! Cancellation is cooperative and one-shot: the flag is monotone, the first
//! reason wins, and later [`cancel`](CancelSource::cancel) calls are no-ops
//! returning `false`.
//!
//! Timeouts are deliberately not built in; cancel a source from a timer of
//! your choosing, or drive a future with
//! [`block_on_timeout`](crate::util::block_on::block_on_timeout).

use crate::channel::waiter::WaiterSet;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Classifies why an operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelKind {
    /// Explicit cancellation by the caller.
    User,
    /// A deadline elapsed.
    Timeout,
    /// The surrounding system is shutting down.
    Shutdown,
}

/// An opaque cancellation payload: a [`CancelKind`] plus a message.
///
/// Cheap to clone; the message is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    kind: CancelKind,
    message: Arc<str>,
}

impl CancelReason {
    /// Builds a reason of the given kind.
    pub fn new(kind: CancelKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into().into(),
        }
    }

    /// A [`CancelKind::User`] reason.
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(CancelKind::User, message)
    }

    /// A [`CancelKind::Timeout`] reason.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CancelKind::Timeout, message)
    }

    /// A [`CancelKind::Shutdown`] reason.
    pub fn shutdown(message: impl Into<String>) -> Self {
        Self::new(CancelKind::Shutdown, message)
    }

    /// The reason's kind.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// The reason's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

type SubscriberFn = Box<dyn FnOnce(CancelReason) + Send>;

struct SignalState {
    reason: Option<CancelReason>,
    subscribers: WaiterSet<SubscriberFn>,
}

/// The cancelling half of a signal pair.
pub struct CancelSource {
    shared: Arc<Mutex<SignalState>>,
}

impl CancelSource {
    /// Creates an uncancelled source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SignalState {
                reason: None,
                subscribers: WaiterSet::new(),
            })),
        }
    }

    /// Returns the observable half. May be called any number of times; all
    /// signals observe the same flag.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancels with the given reason.
    ///
    /// The first call stores the reason, invokes every subscriber (outside
    /// the signal's lock) and returns `true`. Later calls return `false`
    /// without side effect.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let subscribers = {
            let mut state = self.shared.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            state.subscribers.drain()
        };
        for (_, subscriber) in subscribers {
            subscriber(reason.clone());
        }
        true
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("cancelled", &self.shared.lock().reason.is_some())
            .finish_non_exhaustive()
    }
}

/// The observable half of a signal pair. Cheap to clone.
pub struct CancelSignal {
    shared: Arc<Mutex<SignalState>>,
}

impl CancelSignal {
    /// True once the source has cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().reason.is_some()
    }

    /// The cancellation reason, if the source has cancelled.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.shared.lock().reason.clone()
    }

    /// Registers a callback to run when the source cancels.
    ///
    /// If the signal is already cancelled the callback runs immediately, on
    /// the calling thread. Otherwise it runs on the cancelling thread, at
    /// most once. Dropping the returned [`Subscription`] (or calling
    /// [`Subscription::unsubscribe`]) removes the callback in O(1).
    pub fn subscribe(&self, callback: impl FnOnce(CancelReason) + Send + 'static) -> Subscription {
        let mut state = self.shared.lock();
        if let Some(reason) = state.reason.clone() {
            drop(state);
            callback(reason);
            return Subscription {
                shared: Weak::new(),
                id: None,
            };
        }
        let id = state.subscribers.insert(Box::new(callback));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            id: Some(id),
        }
    }
}

impl Clone for CancelSignal {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Handle to an active [`CancelSignal::subscribe`] registration.
///
/// Dropping it unsubscribes. A subscription whose callback has already run
/// (or whose signal is gone) unsubscribes to a no-op.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    shared: Weak<Mutex<SignalState>>,
    id: Option<crate::channel::waiter::WaiterId>,
}

impl Subscription {
    /// Removes the callback if it has not fired yet.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            if let Some(shared) = self.shared.upgrade() {
                shared.lock().subscribers.remove(id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.id.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cancel_is_one_shot() {
        let source = CancelSource::new();
        let signal = source.signal();
        assert!(!signal.is_cancelled());

        assert!(source.cancel(CancelReason::user("first")));
        assert!(!source.cancel(CancelReason::user("second")));

        let reason = signal.reason().expect("cancelled");
        assert_eq!(reason.message(), "first");
        assert_eq!(reason.kind(), CancelKind::User);
    }

    #[test]
    fn subscriber_runs_on_cancel() {
        let source = CancelSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let sub = source.signal().subscribe(move |reason| {
            assert_eq!(reason.message(), "go");
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        source.cancel(CancelReason::user("go"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        drop(sub);
    }

    #[test]
    fn subscribe_after_cancel_runs_immediately() {
        let source = CancelSource::new();
        source.cancel(CancelReason::shutdown("down"));

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let sub = source
            .signal()
            .subscribe(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        sub.unsubscribe();
    }

    #[test]
    fn unsubscribe_prevents_callback() {
        let source = CancelSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let sub = source.signal().subscribe(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();

        source.cancel(CancelReason::user("late"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let source = CancelSource::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        {
            let _sub = source.signal().subscribe(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            });
        }
        source.cancel(CancelReason::user("late"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn signals_share_the_flag() {
        let source = CancelSource::new();
        let a = source.signal();
        let b = a.clone();
        source.cancel(CancelReason::timeout("deadline"));
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(b.reason().expect("cancelled").kind(), CancelKind::Timeout);
    }
}
