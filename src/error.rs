//! Error types for channel and select operations.
//!
//! Errors that reject a value hand the value back to the caller, so a failed
//! send never consumes the message. Reading from a closed channel is not an
//! error: end-of-stream is `Ok(None)` from [`recv`](crate::Channel::recv)
//! and [`TryRecvError::Closed`] from the non-blocking probe.

use crate::signal::CancelReason;
use std::fmt;
use thiserror::Error;

/// Error from [`Channel::try_recv`](crate::Channel::try_recv).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// Nothing is available right now, but the channel is still open.
    #[error("channel is empty")]
    Empty,
    /// The channel is closed and its buffer is drained: end-of-stream.
    #[error("channel closed")]
    Closed,
}

impl TryRecvError {
    /// True for [`TryRecvError::Empty`], which a retry may clear.
    #[must_use]
    pub const fn is_temporary(self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Error from [`Channel::try_send`](crate::Channel::try_send).
///
/// The rejected value rides back inside the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// No buffer slot and no parked reader; a retry may succeed.
    Full(T),
    /// The channel has been closed; no retry will succeed.
    Closed(T),
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "channel is full"),
            Self::Closed(_) => write!(f, "sending on a closed channel"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

impl<T> TrySendError<T> {
    /// Recovers the value that could not be sent.
    pub fn into_value(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    /// True for [`TrySendError::Full`], which a retry may clear.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

/// Error from an awaited [`recv`](crate::Channel::recv).
///
/// End-of-stream is not an error; the only failure is cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The attached [`CancelSignal`](crate::CancelSignal) fired while the
    /// receive was parked (or before it started).
    #[error("receive cancelled: {0}")]
    Cancelled(CancelReason),
}

impl RecvError {
    /// The cancellation reason.
    #[must_use]
    pub const fn reason(&self) -> &CancelReason {
        match self {
            Self::Cancelled(reason) => reason,
        }
    }
}

/// Error from an awaited [`send`](crate::Channel::send).
///
/// Both variants return the unsent value to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError<T> {
    /// The channel closed before (or while) the value could be delivered.
    Closed(T),
    /// The attached [`CancelSignal`](crate::CancelSignal) fired while the
    /// send was parked (or before it started).
    Cancelled {
        /// The value that was not sent.
        value: T,
        /// Why the send was cancelled.
        reason: CancelReason,
    },
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => write!(f, "sending on a closed channel"),
            Self::Cancelled { reason, .. } => write!(f, "send cancelled: {reason}"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

impl<T> SendError<T> {
    /// Recovers the value that was not sent.
    pub fn into_value(self) -> T {
        match self {
            Self::Closed(value) | Self::Cancelled { value, .. } => value,
        }
    }
}

/// Error from an awaited [`select`](crate::select).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// The attached [`CancelSignal`](crate::CancelSignal) fired before any
    /// case did. No case identity is reported.
    #[error("select cancelled: {0}")]
    Cancelled(CancelReason),
}
