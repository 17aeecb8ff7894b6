//! CSP-style channels.
//!
//! A [`Channel`] couples any number of producers with any number of
//! consumers over a bounded buffer (capacity 0 = pure rendezvous). Each
//! value goes to exactly one consumer; this is not a broadcast primitive.
//!
//! The channel handle is cheap to clone and both halves share it; there is
//! no sender/receiver split. Closing is an explicit, idempotent operation
//! rather than a drop side effect: any handle may call
//! [`close`](Channel::close), after which writes fail, buffered values
//! drain, and reads then report end-of-stream.
//!
//! Dispatch among parked peers is uniformly random (see the crate docs on
//! fairness); buffered values themselves are strict FIFO.

pub(crate) mod core;
mod recv;
mod ring;
mod send;
pub(crate) mod waiter;

pub use recv::RecvFut;
pub use send::SendFut;

use self::core::{run_fired, Core, Fired, ReadAttempt, WriteAttempt};
use self::waiter::WaiterId;
use crate::error::{TryRecvError, TrySendError};
use crate::select::{RecvCase, SendCase};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// State shared by every handle to one channel.
pub(crate) struct Shared<T> {
    pub(crate) core: Mutex<Core<T>>,
    capacity: usize,
}

impl<T> Shared<T> {
    /// Runs `f` under the channel lock, then fires every callback and wake
    /// `f` queued, with the lock released so completions can re-enter the
    /// channel freely.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut Core<T>, &mut Fired<T>) -> R) -> R {
        let mut fired = Fired::new();
        let out = {
            let mut core = self.core.lock();
            f(&mut core, &mut fired)
        };
        run_fired(fired);
        out
    }
}

/// A bounded CSP-style channel.
///
/// See the [module docs](self) for semantics. All methods take `&self`;
/// clone the handle to share it across tasks or threads.
pub struct Channel<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.shared.capacity)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Creates a channel with the given buffer capacity.
    ///
    /// Capacity 0 creates a rendezvous channel: every send must meet a
    /// receive.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core::new(capacity)),
                capacity,
            }),
        }
    }

    /// A channel on which nothing is ever sent and which never closes.
    ///
    /// Receives park forever; useful as a disabled arm in hand-rolled
    /// select loops.
    #[must_use]
    pub fn never() -> Self {
        Self::new(0)
    }

    /// A channel that is closed from the start: sends fail, receives report
    /// end-of-stream immediately.
    #[must_use]
    pub fn closed() -> Self {
        let channel = Self::new(0);
        channel.close();
        channel
    }

    /// The buffer capacity this channel was created with.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Current buffer occupancy (always 0 for rendezvous channels).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.core.lock().len()
    }

    /// True when no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once [`close`](Self::close) has been called on any handle.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.core.lock().is_closed()
    }

    /// Receives without parking.
    ///
    /// # Errors
    ///
    /// [`TryRecvError::Empty`] when nothing is available yet,
    /// [`TryRecvError::Closed`] at end-of-stream.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.shared.with_core(|core, fired| match core.try_read(fired) {
            ReadAttempt::Value(value) => Ok(value),
            ReadAttempt::EndOfStream => Err(TryRecvError::Closed),
            ReadAttempt::NotReady => Err(TryRecvError::Empty),
        })
    }

    /// Sends without parking.
    ///
    /// # Errors
    ///
    /// [`TrySendError::Full`] when the value found neither a buffer slot nor
    /// a parked reader, [`TrySendError::Closed`] on a closed channel. The
    /// value rides back in either case.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.shared
            .with_core(|core, fired| match core.try_write(value, fired) {
                WriteAttempt::Buffered | WriteAttempt::HandedOff => Ok(()),
                WriteAttempt::Full(value) => Err(TrySendError::Full(value)),
                WriteAttempt::Closed(value) => Err(TrySendError::Closed(value)),
            })
    }

    /// Receives, parking until a value or end-of-stream arrives.
    ///
    /// Resolves `Ok(Some(value))`, or `Ok(None)` once the channel is closed
    /// and drained. Attach a [`CancelSignal`](crate::CancelSignal) with
    /// [`RecvFut::with_signal`].
    pub fn recv(&self) -> RecvFut<T> {
        RecvFut::new(Arc::clone(&self.shared))
    }

    /// Sends, parking until the value is accepted.
    ///
    /// Resolves `Ok(())` once the value is buffered or handed to a reader.
    /// Attach a [`CancelSignal`](crate::CancelSignal) with
    /// [`SendFut::with_signal`].
    pub fn send(&self, value: T) -> SendFut<T> {
        SendFut::new(Arc::clone(&self.shared), value)
    }

    /// Closes the channel.
    ///
    /// The first call drains both waiter pools (parked readers observe
    /// end-of-stream, parked writers get their values back with a closed
    /// error), wakes every [`wait_closed`](Self::wait_closed) future, and
    /// returns `true`. Later calls return `false` with no side effect.
    pub fn close(&self) -> bool {
        self.shared.with_core(|core, fired| core.close(fired))
    }

    /// Resolves once the channel is closed (immediately if it already is).
    pub fn wait_closed(&self) -> WaitClosed<T> {
        WaitClosed {
            shared: Arc::clone(&self.shared),
            registered: None,
        }
    }

    /// Creates a fresh receive case for [`select`](crate::select).
    ///
    /// Each call returns a distinct case; bind one and reuse it (with its
    /// outcome slot) across repeated selects.
    #[must_use]
    pub fn recv_case(&self) -> RecvCase<T> {
        RecvCase::new(self.clone())
    }
}

impl<T: Clone + Send + 'static> Channel<T> {
    /// Creates a fresh send case for [`select`](crate::select), carrying
    /// the value to deliver. The value is cloned per delivery so the case
    /// can be reused across selects.
    #[must_use]
    pub fn send_case(&self, value: T) -> SendCase<T> {
        SendCase::new(self.clone(), value)
    }
}

/// Future returned by [`Channel::wait_closed`].
#[must_use = "futures do nothing unless polled"]
pub struct WaitClosed<T> {
    shared: Arc<Shared<T>>,
    registered: Option<WaiterId>,
}

impl<T> Future for WaitClosed<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut core = this.shared.core.lock();
        if core.is_closed() {
            // close() drained the waker registry; nothing left to remove.
            this.registered = None;
            return Poll::Ready(());
        }
        match this.registered {
            Some(id) => core.update_close_waker(id, cx.waker()),
            None => this.registered = Some(core.register_close_waker(cx.waker().clone())),
        }
        Poll::Pending
    }
}

impl<T> Drop for WaitClosed<T> {
    fn drop(&mut self) {
        if let Some(id) = self.registered.take() {
            self.shared.core.lock().remove_close_waker(id);
        }
    }
}
