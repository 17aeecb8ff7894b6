//! The parked-receive future and the completion slot it shares with the
//! engine.

use super::core::ReadAttempt;
use super::waiter::{ReadDeliver, ReadWaiter, WaiterId};
use super::Shared;
use crate::error::RecvError;
use crate::signal::{CancelReason, CancelSignal, Subscription};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

/// Shared completion slot between a parked future and the engine callback
/// that will eventually fire for it.
pub(crate) struct OpSlot<D> {
    inner: Mutex<OpSlotInner<D>>,
}

struct OpSlotInner<D> {
    done: Option<D>,
    waker: Option<Waker>,
    /// The owning future was dropped; completions must not land here.
    abandoned: bool,
}

impl<D> OpSlot<D> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(OpSlotInner {
                done: None,
                waker: None,
                abandoned: false,
            }),
        })
    }

    /// Stores the completion and wakes the owner. `Err(done)` when the owner
    /// abandoned the slot, so the caller can re-route the payload.
    pub(crate) fn complete(&self, done: D) -> Result<(), D> {
        let waker = {
            let mut inner = self.inner.lock();
            if inner.abandoned {
                return Err(done);
            }
            debug_assert!(inner.done.is_none(), "slot completed twice");
            inner.done = Some(done);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    pub(crate) fn set_waker(&self, waker: &Waker) {
        self.inner.lock().waker = Some(waker.clone());
    }

    pub(crate) fn take_done(&self, waker: &Waker) -> Option<D> {
        let mut inner = self.inner.lock();
        match inner.done.take() {
            Some(done) => Some(done),
            None => {
                inner.waker = Some(waker.clone());
                None
            }
        }
    }
}

/// What landed in a receive slot.
pub(crate) enum RecvDone<T> {
    /// `Some(value)`, or `None` for end-of-stream.
    Item(Option<T>),
    Cancelled(CancelReason),
}

/// Future returned by [`Channel::recv`](super::Channel::recv).
///
/// Resolves `Ok(Some(value))`, `Ok(None)` at end-of-stream, or
/// `Err(RecvError::Cancelled)` if an attached signal fires first.
///
/// # Cancel safety
///
/// Dropping the future disconnects its parked waiter; a value whose handoff
/// had already committed when the future was dropped is reinstated into the
/// channel (to a parked reader, else ahead of the buffered values). The one
/// unrecoverable corner, where the buffer filled completely while the value
/// was in flight, drops the value.
#[must_use = "futures do nothing unless polled"]
pub struct RecvFut<T> {
    shared: Arc<Shared<T>>,
    signal: Option<CancelSignal>,
    state: RecvState<T>,
}

enum RecvState<T> {
    Init,
    Parked {
        id: WaiterId,
        slot: Arc<OpSlot<RecvDone<T>>>,
        _sub: Option<Subscription>,
    },
    Done,
}

impl<T: Send + 'static> RecvFut<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> Self {
        Self {
            shared,
            signal: None,
            state: RecvState::Init,
        }
    }

    /// Attaches a cancellation signal.
    ///
    /// A signal already cancelled at first poll fails the receive before it
    /// touches the channel; a later cancellation disconnects the parked
    /// waiter in O(1). If a value wins the race with cancellation, the
    /// receive resolves with the value.
    #[must_use]
    pub fn with_signal(mut self, signal: &CancelSignal) -> Self {
        self.signal = Some(signal.clone());
        self
    }
}

/// Builds the engine callback for a parked receive. Captures the channel
/// weakly: the pool owning the callback lives inside the channel itself.
fn deliver_into<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    slot: &Arc<OpSlot<RecvDone<T>>>,
) -> ReadDeliver<T> {
    let shared = Arc::downgrade(shared);
    let slot = Arc::clone(slot);
    Box::new(move |item| {
        if let Err(RecvDone::Item(Some(value))) = slot.complete(RecvDone::Item(item)) {
            // Owner dropped mid-handoff: hand the value back to the channel.
            if let Some(shared) = Weak::upgrade(&shared) {
                shared.with_core(|core, fired| core.requeue_front(value, fired));
            }
        }
    })
}

impl<T: Send + 'static> Future for RecvFut<T> {
    type Output = Result<Option<T>, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            RecvState::Init => {
                if let Some(reason) = this.signal.as_ref().and_then(CancelSignal::reason) {
                    this.state = RecvState::Done;
                    return Poll::Ready(Err(RecvError::Cancelled(reason)));
                }
                let slot = OpSlot::new();
                let attempt = this.shared.with_core(|core, fired| {
                    match core.try_read(fired) {
                        ReadAttempt::Value(value) => Ok(Some(value)),
                        ReadAttempt::EndOfStream => Ok(None),
                        ReadAttempt::NotReady => {
                            // Park inside the same critical section that saw
                            // NotReady, so no value can slip past in between.
                            slot.set_waker(cx.waker());
                            let deliver = deliver_into(&this.shared, &slot);
                            Err(core.park_read(ReadWaiter {
                                armed: None,
                                deliver,
                            }))
                        }
                    }
                });
                match attempt {
                    Ok(item) => {
                        this.state = RecvState::Done;
                        Poll::Ready(Ok(item))
                    }
                    Err(id) => {
                        let sub = this.signal.as_ref().map(|signal| {
                            let shared = Arc::clone(&this.shared);
                            let slot = Arc::clone(&slot);
                            signal.subscribe(move |reason| {
                                cancel_parked_recv(&shared, id, &slot, reason);
                            })
                        });
                        this.state = RecvState::Parked {
                            id,
                            slot,
                            _sub: sub,
                        };
                        Poll::Pending
                    }
                }
            }
            RecvState::Parked { slot, .. } => match slot.take_done(cx.waker()) {
                Some(RecvDone::Item(item)) => {
                    this.state = RecvState::Done;
                    Poll::Ready(Ok(item))
                }
                Some(RecvDone::Cancelled(reason)) => {
                    this.state = RecvState::Done;
                    Poll::Ready(Err(RecvError::Cancelled(reason)))
                }
                None => Poll::Pending,
            },
            RecvState::Done => panic!("RecvFut polled after completion"),
        }
    }
}

/// Signal-cancellation path for a parked receive. Resolves as cancelled only
/// if this call is the one that removed the waiter; otherwise a delivery
/// already committed and the receive completes with its value.
fn cancel_parked_recv<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    id: WaiterId,
    slot: &Arc<OpSlot<RecvDone<T>>>,
    reason: CancelReason,
) {
    let removed = shared.with_core(|core, _| core.readers.disconnect(id));
    if removed.is_some() {
        let _ = slot.complete(RecvDone::Cancelled(reason));
    }
}

impl<T> Drop for RecvFut<T> {
    fn drop(&mut self) {
        if let RecvState::Parked { id, slot, .. } = &self.state {
            let id = *id;
            let slot = Arc::clone(slot);
            self.shared.with_core(|core, fired| {
                if core.readers.disconnect(id).is_some() {
                    return;
                }
                // Already dispatched: reclaim the in-flight value if it has
                // landed, otherwise mark the slot so the delivery callback
                // re-routes it.
                let mut inner = slot.inner.lock();
                inner.abandoned = true;
                if let Some(RecvDone::Item(Some(value))) = inner.done.take() {
                    drop(inner);
                    core.requeue_front(value, fired);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::error::TryRecvError;
    use crate::signal::CancelSource;
    use crate::util::block_on::{block_on, poll_now};

    #[test]
    fn resolves_immediately_when_buffered() {
        let ch: Channel<u32> = Channel::new(1);
        ch.try_send(5).unwrap();
        assert_eq!(block_on(ch.recv()), Ok(Some(5)));
    }

    #[test]
    fn parks_when_empty() {
        let ch: Channel<u32> = Channel::new(1);
        let mut fut = ch.recv();
        assert!(poll_now(&mut fut).is_pending());
        ch.try_send(6).unwrap();
        assert_eq!(block_on(fut), Ok(Some(6)));
    }

    #[test]
    fn pre_cancelled_signal_never_touches_the_channel() {
        let ch: Channel<u32> = Channel::new(1);
        ch.try_send(1).unwrap();
        let source = CancelSource::new();
        source.cancel(CancelReason::user("stop"));

        let out = block_on(ch.recv().with_signal(&source.signal()));
        match out {
            Err(RecvError::Cancelled(reason)) => assert_eq!(reason.message(), "stop"),
            other => panic!("expected cancellation, got {other:?}"),
        }
        // The buffered value is untouched.
        assert_eq!(ch.try_recv(), Ok(1));
    }

    #[test]
    fn cancel_while_parked() {
        let ch: Channel<u32> = Channel::new(0);
        let source = CancelSource::new();
        let mut fut = ch.recv().with_signal(&source.signal());
        assert!(poll_now(&mut fut).is_pending());

        assert!(source.cancel(CancelReason::user("stop")));
        match block_on(fut) {
            Err(RecvError::Cancelled(reason)) => assert_eq!(reason.message(), "stop"),
            other => panic!("expected cancellation, got {other:?}"),
        }
        // The waiter is gone: a later send finds no reader.
        assert!(ch.try_send(1).is_err());
    }

    #[test]
    fn dropping_a_parked_recv_disconnects_it() {
        let ch: Channel<u32> = Channel::new(0);
        {
            let mut fut = ch.recv();
            assert!(poll_now(&mut fut).is_pending());
        }
        assert!(ch.try_send(1).is_err());
    }

    #[test]
    fn value_delivered_but_unpolled_is_reinstated_on_drop() {
        let ch: Channel<u32> = Channel::new(1);
        {
            let mut fut = ch.recv();
            assert!(poll_now(&mut fut).is_pending());
            // Handoff commits while the future is parked...
            ch.try_send(42).unwrap();
            // ...and the future is dropped without being polled again.
        }
        assert_eq!(ch.try_recv(), Ok(42));
    }

    #[test]
    fn reinstated_value_precedes_later_writes() {
        let ch: Channel<u32> = Channel::new(2);
        {
            let mut fut = ch.recv();
            assert!(poll_now(&mut fut).is_pending());
            ch.try_send(1).unwrap();
            ch.try_send(2).unwrap();
        }
        assert_eq!(ch.try_recv(), Ok(1));
        assert_eq!(ch.try_recv(), Ok(2));
        assert_eq!(ch.try_recv(), Err(TryRecvError::Empty));
    }
}
