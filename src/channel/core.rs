//! The rendezvous engine.
//!
//! One state machine decides, synchronously and under the channel lock,
//! whether an operation completes immediately, buffers, hands off to a
//! parked peer, or must park. Invariants it maintains between any two calls:
//!
//! - a parked reader implies an empty buffer (the reader would have drained
//!   it);
//! - a parked writer implies a full buffer or no buffer at all (the writer
//!   would have appended);
//! - `closed` is monotone, and closing drains both pools;
//! - every accepted value reaches exactly one reader, rests in the buffer,
//!   or returns to its writer as a failure.
//!
//! Completion callbacks and wakes never run under the lock. Every method
//! that can fire one pushes it onto a caller-supplied [`Fired`] list; the
//! façade runs the list after releasing the lock (see
//! [`Shared::with_core`](super::Shared::with_core)).

use super::ring::RingBuffer;
use super::waiter::{
    ArmedClaim, Pool, ReadDeliver, ReadWaiter, WaiterId, WaiterSet, WriteDeliver, WriteFired,
    WriteWaiter,
};
use crate::util::rng::Rng;
use smallvec::SmallVec;
use std::task::Waker;

/// Outcome of a synchronous read attempt.
pub(crate) enum ReadAttempt<T> {
    /// A value was obtained (from the buffer or a direct handoff).
    Value(T),
    /// Closed and drained.
    EndOfStream,
    /// Nothing available; the caller may park.
    NotReady,
}

/// Outcome of a synchronous write attempt. Rejected values ride back out.
pub(crate) enum WriteAttempt<T> {
    /// The value entered the buffer.
    Buffered,
    /// The value went directly to a parked reader.
    HandedOff,
    /// No room and no reader; the caller may park.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

/// Result of arming a receive case against this channel.
pub(crate) enum ArmRead<T> {
    /// The case fired synchronously: a value, or `None` for end-of-stream.
    Fired(Option<T>),
    /// Another case of the same select won first; nothing was touched.
    Lost,
    /// The case parked an armed waiter.
    Parked(WaiterId),
}

/// Result of arming a send case against this channel.
pub(crate) enum ArmWrite {
    /// The value was buffered or handed off.
    Sent,
    /// The channel is closed.
    Closed,
    /// Another case of the same select won first; nothing was touched.
    Lost,
    /// The case parked an armed waiter.
    Parked(WaiterId),
}

/// A callback or wake queued to run after the channel lock is released.
pub(crate) enum Firing<T> {
    Read(ReadDeliver<T>, Option<T>),
    Write(WriteDeliver<T>, WriteFired<T>),
    CloseWake(Waker),
}

pub(crate) type Fired<T> = SmallVec<[Firing<T>; 4]>;

/// Runs a deferred-firing list. The channel lock must not be held.
pub(crate) fn run_fired<T>(fired: Fired<T>) {
    for firing in fired {
        match firing {
            Firing::Read(deliver, item) => deliver(item),
            Firing::Write(deliver, fate) => deliver(fate),
            Firing::CloseWake(waker) => waker.wake(),
        }
    }
}

pub(crate) struct Core<T> {
    buffer: Option<RingBuffer<T>>,
    pub(crate) readers: Pool<ReadWaiter<T>>,
    pub(crate) writers: Pool<WriteWaiter<T>>,
    closed: bool,
    close_wakers: WaiterSet<Waker>,
    rng: Rng,
}

impl<T> Core<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buffer: (capacity > 0).then(|| RingBuffer::new(capacity)),
            readers: Pool::new(),
            writers: Pool::new(),
            closed: false,
            close_wakers: WaiterSet::new(),
            rng: Rng::from_entropy(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, RingBuffer::len)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Synchronous read path.
    ///
    /// Draining a buffered value while a writer is parked pulls that writer
    /// into the vacated slot, so buffered FIFO order is preserved and a
    /// parked writer never coexists with a non-full buffer.
    pub(crate) fn try_read(&mut self, fired: &mut Fired<T>) -> ReadAttempt<T> {
        if let Some(buffer) = self.buffer.as_mut() {
            if let Some(value) = buffer.pop() {
                if let Some((_, writer)) = self.writers.take_one(&mut self.rng) {
                    let WriteWaiter {
                        value: refill,
                        deliver,
                        ..
                    } = writer;
                    if buffer.push(refill).is_err() {
                        unreachable!("slot was vacated by the pop above");
                    }
                    fired.push(Firing::Write(deliver, WriteFired::Sent));
                }
                return ReadAttempt::Value(value);
            }
        }
        if self.closed {
            return ReadAttempt::EndOfStream;
        }
        if let Some((_, writer)) = self.writers.take_one(&mut self.rng) {
            // Rendezvous handoff, bypassing the (empty or absent) buffer.
            let WriteWaiter { value, deliver, .. } = writer;
            fired.push(Firing::Write(deliver, WriteFired::Sent));
            return ReadAttempt::Value(value);
        }
        ReadAttempt::NotReady
    }

    /// Synchronous write path: closed check, then a parked reader, then the
    /// buffer.
    pub(crate) fn try_write(&mut self, value: T, fired: &mut Fired<T>) -> WriteAttempt<T> {
        if self.closed {
            return WriteAttempt::Closed(value);
        }
        if let Some((_, reader)) = self.readers.take_one(&mut self.rng) {
            fired.push(Firing::Read(reader.deliver, Some(value)));
            return WriteAttempt::HandedOff;
        }
        if let Some(buffer) = self.buffer.as_mut() {
            return match buffer.push(value) {
                Ok(()) => WriteAttempt::Buffered,
                Err(value) => WriteAttempt::Full(value),
            };
        }
        WriteAttempt::Full(value)
    }

    /// Parks a reader. Call only in the same critical section in which
    /// [`try_read`](Self::try_read) reported `NotReady`.
    pub(crate) fn park_read(&mut self, waiter: ReadWaiter<T>) -> WaiterId {
        debug_assert!(self.len() == 0 && !self.closed);
        self.readers.connect(waiter)
    }

    /// Parks a writer. Call only in the same critical section in which
    /// [`try_write`](Self::try_write) reported `Full`.
    pub(crate) fn park_write(&mut self, waiter: WriteWaiter<T>) -> WaiterId {
        debug_assert!(!self.closed);
        self.writers.connect(waiter)
    }

    /// Closes the channel. Idempotent; `true` on the first call only.
    ///
    /// Drains both pools: parked writers get their values back with a
    /// closed notification, parked readers observe end-of-stream, and every
    /// close-waiter wakes. Buffered values stay receivable.
    pub(crate) fn close(&mut self, fired: &mut Fired<T>) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for writer in self.writers.drain_claimed() {
            let WriteWaiter { value, deliver, .. } = writer;
            fired.push(Firing::Write(deliver, WriteFired::Closed(value)));
        }
        for reader in self.readers.drain_claimed() {
            fired.push(Firing::Read(reader.deliver, None));
        }
        for (_, waker) in self.close_wakers.drain() {
            fired.push(Firing::CloseWake(waker));
        }
        true
    }

    /// Puts an in-flight value back into the channel after its receiving
    /// future was dropped mid-handoff: a parked reader first, else the
    /// front of the buffer so it precedes later writes.
    pub(crate) fn requeue_front(&mut self, value: T, fired: &mut Fired<T>) {
        if let Some((_, reader)) = self.readers.take_one(&mut self.rng) {
            fired.push(Firing::Read(reader.deliver, Some(value)));
            return;
        }
        if let Some(buffer) = self.buffer.as_mut() {
            if buffer.push_front(value).is_ok() {
                return;
            }
        }
        // Both homes are gone: the pools emptied and the buffer filled while
        // the value was in flight. The value is dropped here; see the
        // cancel-safety notes on RecvFut.
    }

    /// Arms a receive case: fires synchronously if the channel is ready and
    /// the claim wins, parks an armed waiter otherwise.
    pub(crate) fn arm_read(
        &mut self,
        claim: ArmedClaim,
        deliver: ReadDeliver<T>,
        fired: &mut Fired<T>,
    ) -> ArmRead<T> {
        if self.buffer.as_ref().is_some_and(|b| !b.is_empty()) {
            if !claim.try_claim() {
                return ArmRead::Lost;
            }
            match self.try_read(fired) {
                ReadAttempt::Value(value) => return ArmRead::Fired(Some(value)),
                ReadAttempt::EndOfStream | ReadAttempt::NotReady => {
                    unreachable!("buffer was non-empty under the channel lock")
                }
            }
        }
        if self.closed {
            return if claim.try_claim() {
                ArmRead::Fired(None)
            } else {
                ArmRead::Lost
            };
        }
        if let Some((id, writer)) = self.writers.take_one(&mut self.rng) {
            if claim.try_claim() {
                let WriteWaiter { value, deliver: write_deliver, .. } = writer;
                fired.push(Firing::Write(write_deliver, WriteFired::Sent));
                return ArmRead::Fired(Some(value));
            }
            // The peer is already committed to this pairing (its own select,
            // if any, was claimed by take_one). Park it again unclaimed so
            // its value waits for the next reader instead of being stranded.
            let WriteWaiter { value, deliver: write_deliver, .. } = writer;
            self.writers.repark(
                id,
                WriteWaiter {
                    value,
                    armed: None,
                    deliver: write_deliver,
                },
            );
            return ArmRead::Lost;
        }
        let id = self.readers.connect(ReadWaiter {
            armed: Some(claim),
            deliver,
        });
        ArmRead::Parked(id)
    }

    /// Arms a send case; the mirror image of [`arm_read`](Self::arm_read).
    pub(crate) fn arm_write(
        &mut self,
        value: T,
        claim: ArmedClaim,
        deliver: WriteDeliver<T>,
        fired: &mut Fired<T>,
    ) -> ArmWrite {
        if self.closed {
            return if claim.try_claim() {
                ArmWrite::Closed
            } else {
                ArmWrite::Lost
            };
        }
        if let Some((id, reader)) = self.readers.take_one(&mut self.rng) {
            if claim.try_claim() {
                fired.push(Firing::Read(reader.deliver, Some(value)));
                return ArmWrite::Sent;
            }
            self.readers.repark(
                id,
                ReadWaiter {
                    armed: None,
                    deliver: reader.deliver,
                },
            );
            return ArmWrite::Lost;
        }
        if let Some(buffer) = self.buffer.as_mut() {
            if !buffer.is_full() {
                if !claim.try_claim() {
                    return ArmWrite::Lost;
                }
                if buffer.push(value).is_err() {
                    unreachable!("buffer had room under the channel lock");
                }
                return ArmWrite::Sent;
            }
        }
        let id = self.writers.connect(WriteWaiter {
            value,
            armed: Some(claim),
            deliver,
        });
        ArmWrite::Parked(id)
    }

    /// Registers a waker to fire on close.
    pub(crate) fn register_close_waker(&mut self, waker: Waker) -> WaiterId {
        debug_assert!(!self.closed);
        self.close_wakers.insert(waker)
    }

    /// Replaces a registered close waker in place.
    pub(crate) fn update_close_waker(&mut self, id: WaiterId, waker: &Waker) {
        if let Some(slot) = self.close_wakers.get_mut(id) {
            slot.clone_from(waker);
        }
    }

    pub(crate) fn remove_close_waker(&mut self, id: WaiterId) {
        self.close_wakers.remove(id);
    }
}

impl<T> std::fmt::Debug for Core<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("len", &self.len())
            .field("closed", &self.closed)
            .field("readers", &self.readers.len())
            .field("writers", &self.writers.len())
            .finish()
    }
}
