//! The parked-send future.

use super::core::WriteAttempt;
use super::recv::OpSlot;
use super::waiter::{WaiterId, WriteDeliver, WriteFired, WriteWaiter};
use super::Shared;
use crate::error::SendError;
use crate::signal::{CancelReason, CancelSignal, Subscription};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// What landed in a send slot.
enum SendDone<T> {
    Sent,
    Closed(T),
    Cancelled { value: T, reason: CancelReason },
}

/// Future returned by [`Channel::send`](super::Channel::send).
///
/// Resolves `Ok(())` once the value is buffered or handed to a reader.
/// Failure always returns the value: [`SendError::Closed`] when the channel
/// closes first, [`SendError::Cancelled`] when an attached signal fires
/// first.
///
/// # Cancel safety
///
/// Dropping the future while parked withdraws the value with it, as if the
/// send was never attempted. A send that already committed cannot be
/// withdrawn.
#[must_use = "futures do nothing unless polled"]
pub struct SendFut<T> {
    shared: Arc<Shared<T>>,
    signal: Option<CancelSignal>,
    state: SendState<T>,
}

enum SendState<T> {
    Init(Option<T>),
    Parked {
        id: WaiterId,
        slot: Arc<OpSlot<SendDone<T>>>,
        _sub: Option<Subscription>,
    },
    Done,
}

// SendFut is never pinned to a self-referential location: `poll` only ever
// calls `get_mut`, matching `RecvFut`'s treatment. Restore the auto-trait
// that a bare `T` field in `SendState::Init` would otherwise block.
impl<T> Unpin for SendFut<T> {}

impl<T: Send + 'static> SendFut<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>, value: T) -> Self {
        Self {
            shared,
            signal: None,
            state: SendState::Init(Some(value)),
        }
    }

    /// Attaches a cancellation signal.
    ///
    /// A signal already cancelled at first poll fails the send before it
    /// touches the channel; a later cancellation disconnects the parked
    /// waiter in O(1) and returns the value inside the error. If delivery
    /// wins the race with cancellation, the send resolves `Ok(())`.
    #[must_use]
    pub fn with_signal(mut self, signal: &CancelSignal) -> Self {
        self.signal = Some(signal.clone());
        self
    }
}

impl<T: Send + 'static> Future for SendFut<T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            SendState::Init(value) => {
                let value = value.take().expect("value present before first poll");
                if let Some(reason) = this.signal.as_ref().and_then(CancelSignal::reason) {
                    this.state = SendState::Done;
                    return Poll::Ready(Err(SendError::Cancelled { value, reason }));
                }
                let slot = OpSlot::new();
                let attempt = this.shared.with_core(|core, fired| {
                    match core.try_write(value, fired) {
                        WriteAttempt::Buffered | WriteAttempt::HandedOff => Ok(Ok(())),
                        WriteAttempt::Closed(value) => Ok(Err(SendError::Closed(value))),
                        WriteAttempt::Full(value) => {
                            // Park inside the same critical section that saw
                            // Full, so no slot can open up in between.
                            slot.set_waker(cx.waker());
                            let deliver: WriteDeliver<T> = {
                                let slot = Arc::clone(&slot);
                                Box::new(move |fate| {
                                    let done = match fate {
                                        WriteFired::Sent => SendDone::Sent,
                                        WriteFired::Closed(value) => SendDone::Closed(value),
                                    };
                                    let _ = slot.complete(done);
                                })
                            };
                            Err(core.park_write(WriteWaiter {
                                value,
                                armed: None,
                                deliver,
                            }))
                        }
                    }
                });
                match attempt {
                    Ok(result) => {
                        this.state = SendState::Done;
                        Poll::Ready(result)
                    }
                    Err(id) => {
                        let sub = this.signal.as_ref().map(|signal| {
                            let shared = Arc::clone(&this.shared);
                            let slot = Arc::clone(&slot);
                            signal.subscribe(move |reason| {
                                cancel_parked_send(&shared, id, &slot, reason);
                            })
                        });
                        this.state = SendState::Parked {
                            id,
                            slot,
                            _sub: sub,
                        };
                        Poll::Pending
                    }
                }
            }
            SendState::Parked { slot, .. } => match slot.take_done(cx.waker()) {
                Some(SendDone::Sent) => {
                    this.state = SendState::Done;
                    Poll::Ready(Ok(()))
                }
                Some(SendDone::Closed(value)) => {
                    this.state = SendState::Done;
                    Poll::Ready(Err(SendError::Closed(value)))
                }
                Some(SendDone::Cancelled { value, reason }) => {
                    this.state = SendState::Done;
                    Poll::Ready(Err(SendError::Cancelled { value, reason }))
                }
                None => Poll::Pending,
            },
            SendState::Done => panic!("SendFut polled after completion"),
        }
    }
}

/// Signal-cancellation path for a parked send. Only the call that removes
/// the waiter resolves the send as cancelled, and it gets the value back;
/// otherwise delivery already committed.
fn cancel_parked_send<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    id: WaiterId,
    slot: &Arc<OpSlot<SendDone<T>>>,
    reason: CancelReason,
) {
    let removed = shared.with_core(|core, _| core.writers.disconnect(id));
    if let Some(waiter) = removed {
        let _ = slot.complete(SendDone::Cancelled {
            value: waiter.value,
            reason,
        });
    }
}

impl<T> Drop for SendFut<T> {
    fn drop(&mut self) {
        if let SendState::Parked { id, .. } = &self.state {
            let id = *id;
            // Withdraw the value if it is still parked; a committed delivery
            // stands.
            self.shared.with_core(|core, _| {
                core.writers.disconnect(id);
            });
        }
    }
}
