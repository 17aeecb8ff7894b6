//! Arm-able case objects over channel operations.
//!
//! A case is a reusable view of one pending operation on one channel. It
//! holds an outcome slot that [`select`](crate::select) fills when the case
//! fires; the caller inspects the slot with `take()` after learning which
//! case won. Every factory call produces a distinct case; bind a case once
//! and reuse it (the select entry points reset the slot each round).

use super::{SelectDone, SelectShared};
use crate::channel::core::{ArmRead, ArmWrite, ReadAttempt, WriteAttempt};
use crate::channel::waiter::{ReadDeliver, WriteDeliver, WriteFired};
use crate::channel::Channel;
use parking_lot::Mutex;
use std::sync::Arc;

/// Outcome of a fired receive case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    /// A value was received.
    Value(T),
    /// The channel reported end-of-stream.
    Closed,
}

/// Outcome of a fired send case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The value was buffered or handed to a reader.
    Sent,
    /// The channel was closed; nothing was sent.
    Closed,
}

/// Result of arming one case.
#[doc(hidden)]
pub enum ArmOutcome {
    /// The case fired synchronously while arming; its outcome is stored.
    Fired,
    /// Another case of the same select won first.
    Lost,
    /// The case parked; the connection cancels the park.
    Parked(Connection),
}

/// Cancels one parked arm. Disconnecting twice is a no-op, as is
/// disconnecting an arm that already fired.
#[doc(hidden)]
pub struct Connection {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Connection {
    pub(crate) fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A channel operation usable as an arm of [`select`](crate::select) /
/// [`try_select`](crate::try_select).
///
/// Implemented by [`RecvCase`] and [`SendCase`] only.
pub trait SelectArm: sealed::Sealed + Sync {
    /// Clears the stored outcome. The select entry points call this on
    /// every case before each round.
    fn reset(&self);

    /// Synchronous attempt; stores the outcome and reports whether the
    /// case fired.
    #[doc(hidden)]
    fn try_fire(&self) -> bool;

    /// Parks the operation under the select's first-wins token, or fires it
    /// immediately if the channel is ready.
    #[doc(hidden)]
    fn arm(&self, select: &Arc<SelectShared>, index: usize) -> ArmOutcome;
}

/// A receive operation on one channel, usable as a select arm.
///
/// Created by [`Channel::recv_case`]. After this case wins a select, the
/// outcome is available from [`take`](Self::take) exactly once.
pub struct RecvCase<T> {
    chan: Channel<T>,
    slot: Arc<Mutex<Option<RecvOutcome<T>>>>,
}

impl<T: Send + 'static> RecvCase<T> {
    pub(crate) fn new(chan: Channel<T>) -> Self {
        Self {
            chan,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Moves the stored outcome out; `None` if the case has not fired since
    /// the last reset (or take).
    #[must_use]
    pub fn take(&self) -> Option<RecvOutcome<T>> {
        self.slot.lock().take()
    }
}

impl<T> std::fmt::Debug for RecvCase<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvCase")
            .field("ready", &self.slot.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<T> sealed::Sealed for RecvCase<T> {}

impl<T: Send + 'static> SelectArm for RecvCase<T> {
    fn reset(&self) {
        *self.slot.lock() = None;
    }

    fn try_fire(&self) -> bool {
        self.chan
            .shared
            .with_core(|core, fired| match core.try_read(fired) {
                ReadAttempt::Value(value) => {
                    *self.slot.lock() = Some(RecvOutcome::Value(value));
                    true
                }
                ReadAttempt::EndOfStream => {
                    *self.slot.lock() = Some(RecvOutcome::Closed);
                    true
                }
                ReadAttempt::NotReady => false,
            })
    }

    fn arm(&self, select: &Arc<SelectShared>, index: usize) -> ArmOutcome {
        let claim = select.claim_for(index);
        let deliver: ReadDeliver<T> = {
            let slot = Arc::clone(&self.slot);
            let select = Arc::clone(select);
            Box::new(move |item| {
                *slot.lock() = Some(match item {
                    Some(value) => RecvOutcome::Value(value),
                    None => RecvOutcome::Closed,
                });
                select.finish(SelectDone::Won(index));
            })
        };

        let armed = self
            .chan
            .shared
            .with_core(|core, fired| core.arm_read(claim, deliver, fired));
        match armed {
            ArmRead::Fired(item) => {
                *self.slot.lock() = Some(match item {
                    Some(value) => RecvOutcome::Value(value),
                    None => RecvOutcome::Closed,
                });
                select.finish(SelectDone::Won(index));
                ArmOutcome::Fired
            }
            ArmRead::Lost => ArmOutcome::Lost,
            ArmRead::Parked(id) => {
                let shared = Arc::clone(&self.chan.shared);
                ArmOutcome::Parked(Connection {
                    cancel: Some(Box::new(move || {
                        shared.with_core(|core, _| {
                            core.readers.disconnect(id);
                        });
                    })),
                })
            }
        }
    }
}

/// A send operation on one channel, usable as a select arm.
///
/// Created by [`Channel::send_case`]. Carries the value to deliver; the
/// value is cloned per delivery so the case can fire in repeated selects.
pub struct SendCase<T> {
    chan: Channel<T>,
    value: T,
    slot: Arc<Mutex<Option<SendOutcome>>>,
}

impl<T: Clone + Send + 'static> SendCase<T> {
    pub(crate) fn new(chan: Channel<T>, value: T) -> Self {
        Self {
            chan,
            value,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Moves the stored outcome out; `None` if the case has not fired since
    /// the last reset (or take).
    #[must_use]
    pub fn take(&self) -> Option<SendOutcome> {
        self.slot.lock().take()
    }
}

impl<T> std::fmt::Debug for SendCase<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCase")
            .field("ready", &self.slot.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<T> sealed::Sealed for SendCase<T> {}

impl<T: Clone + Send + Sync + 'static> SelectArm for SendCase<T> {
    fn reset(&self) {
        *self.slot.lock() = None;
    }

    fn try_fire(&self) -> bool {
        let value = self.value.clone();
        self.chan
            .shared
            .with_core(|core, fired| match core.try_write(value, fired) {
                WriteAttempt::Buffered | WriteAttempt::HandedOff => {
                    *self.slot.lock() = Some(SendOutcome::Sent);
                    true
                }
                WriteAttempt::Closed(_) => {
                    *self.slot.lock() = Some(SendOutcome::Closed);
                    true
                }
                WriteAttempt::Full(_) => false,
            })
    }

    fn arm(&self, select: &Arc<SelectShared>, index: usize) -> ArmOutcome {
        let claim = select.claim_for(index);
        let deliver: WriteDeliver<T> = {
            let slot = Arc::clone(&self.slot);
            let select = Arc::clone(select);
            Box::new(move |fate| {
                *slot.lock() = Some(match fate {
                    WriteFired::Sent => SendOutcome::Sent,
                    WriteFired::Closed(_) => SendOutcome::Closed,
                });
                select.finish(SelectDone::Won(index));
            })
        };

        let value = self.value.clone();
        let armed = self
            .chan
            .shared
            .with_core(|core, fired| core.arm_write(value, claim, deliver, fired));
        match armed {
            ArmWrite::Sent => {
                *self.slot.lock() = Some(SendOutcome::Sent);
                select.finish(SelectDone::Won(index));
                ArmOutcome::Fired
            }
            ArmWrite::Closed => {
                *self.slot.lock() = Some(SendOutcome::Closed);
                select.finish(SelectDone::Won(index));
                ArmOutcome::Fired
            }
            ArmWrite::Lost => ArmOutcome::Lost,
            ArmWrite::Parked(id) => {
                let shared = Arc::clone(&self.chan.shared);
                ArmOutcome::Parked(Connection {
                    cancel: Some(Box::new(move || {
                        shared.with_core(|core, _| {
                            core.writers.disconnect(id);
                        });
                    })),
                })
            }
        }
    }
}
