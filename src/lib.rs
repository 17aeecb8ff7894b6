//! CSP-style rendezvous channels with a randomized multi-way select.
//!
//! A [`Channel`] is a typed, bounded endpoint coupling any number of
//! producers with any number of consumers. Capacity 0 makes it a pure
//! rendezvous: every value requires a producer and a consumer to meet.
//! Capacity `n > 0` adds a strict-FIFO buffer of at most `n` values in
//! front of the rendezvous machinery.
//!
//! [`select`] waits on several channel operations at once and proceeds with
//! whichever is ready first. When several operations are ready at the same
//! time the winner is chosen uniformly at random, and when several peers are
//! parked on the same channel the one dispatched is also chosen uniformly at
//! random. Randomness is the fairness contract of this crate, not an
//! implementation detail: no waiter can be starved by arrival order.
//!
//! # Blocking model
//!
//! The crate is scheduler-agnostic. Suspending operations ([`Channel::recv`],
//! [`Channel::send`], [`Channel::wait_closed`], [`select`]) are plain
//! [`std::future::Future`]s and can be driven by any executor. For tests and
//! runtime-free programs, [`util::block_on`] drives a future on the current
//! thread.
//!
//! ```
//! use cspchan::Channel;
//!
//! let ch: Channel<u32> = Channel::new(2);
//! ch.try_send(1).unwrap();
//! ch.try_send(2).unwrap();
//! assert!(ch.try_send(3).is_err()); // full
//! assert_eq!(ch.try_recv(), Ok(1)); // strict FIFO
//! assert_eq!(ch.try_recv(), Ok(2));
//! ```
//!
//! # Closing
//!
//! [`Channel::close`] is idempotent (first call returns `true`). Closing
//! drains both waiter pools before returning: every parked reader observes
//! end-of-stream and every parked writer gets its value back with a
//! closed error. Values already buffered remain receivable after close;
//! end-of-stream is reported only once the buffer is drained, and is not an
//! error; [`Channel::recv`] resolves `Ok(None)`.
//!
//! # Cancellation
//!
//! A [`CancelSource`] / [`CancelSignal`] pair carries an out-of-band
//! cancellation flag with a [`CancelReason`] payload. Attaching a signal to
//! an operation ([`RecvFut::with_signal`], [`SendFut::with_signal`], the
//! `signal` argument of [`select`]) cancels the parked operation in O(1)
//! when the signal fires; a cancelled send returns its value inside the
//! error. A signal that is already cancelled short-circuits the operation
//! before it touches the channel.
//!
//! # Select
//!
//! Case objects ([`RecvCase`], [`SendCase`]) are reusable arm-able views
//! over one channel operation. [`try_select`] is the non-blocking form (the
//! `default` arm of a Go select); [`select`] parks on every case under a
//! first-wins discipline until one fires.
//!
//! ```ignore
//! let rc = ch.recv_case();
//! let wc = other.send_case(value);
//! match block_on(select(&[Some(&rc), Some(&wc)], None))? {
//!     0 => println!("received {:?}", rc.take()),
//!     1 => println!("sent: {:?}", wc.take()),
//!     _ => unreachable!(),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod error;
pub mod select;
pub mod signal;
pub mod util;

pub use channel::{Channel, RecvFut, SendFut, WaitClosed};
pub use error::{RecvError, SelectError, SendError, TryRecvError, TrySendError};
pub use select::{
    select, try_select, RecvCase, RecvOutcome, Select, SelectArm, SendCase, SendOutcome,
};
pub use signal::{CancelKind, CancelReason, CancelSignal, CancelSource, Subscription};
