//! Multi-way select over channel operations.
//!
//! [`try_select`] is the non-blocking form: it attempts every case once and
//! reports the winner, or `None` when nothing is ready (the `default` arm of
//! a Go select). [`select`] returns a future that parks on every case and
//! resolves with the first one to fire.
//!
//! Fairness: each round shuffles the cases with a Fisher–Yates pass before
//! sweeping, so simultaneous readiness breaks ties uniformly at random; a
//! case's position in the argument list grants no priority. Parked arms obey
//! a first-wins discipline: exactly one case per select call takes effect,
//! the rest are disconnected.
//!
//! Entries in the case slice may be `None` to disable an arm without
//! re-shaping the slice (the nil-channel idiom); the winner is reported as
//! its index in the original slice.

pub mod case;

pub use case::{RecvCase, RecvOutcome, SelectArm, SendCase, SendOutcome};

use self::case::{ArmOutcome, Connection};
use crate::channel::waiter::{ArmedClaim, CLAIM_CANCELLED, CLAIM_OPEN};
use crate::error::SelectError;
use crate::signal::{CancelReason, CancelSignal, Subscription};
use crate::util::rng::Rng;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// First-wins state shared by every arm of one select call.
#[doc(hidden)]
pub struct SelectShared {
    /// Claim token: [`CLAIM_OPEN`], a case index + 1, or
    /// [`CLAIM_CANCELLED`].
    winner: Arc<AtomicUsize>,
    state: Mutex<SelectState>,
}

struct SelectState {
    done: Option<SelectDone>,
    waker: Option<Waker>,
}

#[derive(Clone)]
pub(crate) enum SelectDone {
    /// The case at this original index fired; its outcome is stored in it.
    Won(usize),
    Cancelled(CancelReason),
}

impl SelectShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            winner: Arc::new(AtomicUsize::new(CLAIM_OPEN)),
            state: Mutex::new(SelectState {
                done: None,
                waker: None,
            }),
        })
    }

    /// A claim token for the arm at `index`.
    pub(crate) fn claim_for(&self, index: usize) -> ArmedClaim {
        ArmedClaim::new(Arc::clone(&self.winner), index)
    }

    /// Records the resolution and wakes the select future. First call wins.
    pub(crate) fn finish(&self, done: SelectDone) {
        let waker = {
            let mut state = self.state.lock();
            if state.done.is_some() {
                return;
            }
            state.done = Some(done);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Claims the winner token for cancellation; fails if a case already
    /// won (or cancellation already claimed it).
    fn claim_cancelled(&self) -> bool {
        self.winner
            .compare_exchange(
                CLAIM_OPEN,
                CLAIM_CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Attempts every case once, without parking.
///
/// Resets every case, shuffles, and sweeps; returns the index (in `cases`)
/// of the first case that fired, or `None` when nothing is ready. `None`
/// entries are skipped.
pub fn try_select(cases: &[Option<&dyn SelectArm>]) -> Option<usize> {
    let mut live: Vec<(usize, &dyn SelectArm)> = cases
        .iter()
        .copied()
        .enumerate()
        .filter_map(|(index, case)| case.map(|case| (index, case)))
        .collect();
    for (_, case) in &live {
        case.reset();
    }
    let mut rng = Rng::from_entropy();
    rng.shuffle(&mut live);
    for (index, case) in live {
        if case.try_fire() {
            return Some(index);
        }
    }
    None
}

/// Waits on every case at once; resolves with the index (in `cases`) of the
/// first one to fire.
///
/// - `None` entries are disabled arms and are skipped.
/// - With no live case and no signal, the future never resolves.
/// - A signal that is already cancelled fails the select on first poll
///   without touching any channel; a later cancellation disconnects every
///   parked arm and resolves `Err(SelectError::Cancelled)`, unless a case
///   already won.
///
/// After the future resolves with `Ok(index)`, the winning case holds its
/// outcome; every other case is left unfired.
pub fn select<'a>(
    cases: &[Option<&'a dyn SelectArm>],
    signal: Option<&CancelSignal>,
) -> Select<'a> {
    Select {
        cases: cases
            .iter()
            .copied()
            .enumerate()
            .filter_map(|(index, case)| case.map(|case| (index, case)))
            .collect(),
        signal: signal.cloned(),
        state: SelectFutState::Init,
    }
}

/// Future returned by [`select`].
#[must_use = "futures do nothing unless polled"]
pub struct Select<'a> {
    cases: Vec<(usize, &'a dyn SelectArm)>,
    signal: Option<CancelSignal>,
    state: SelectFutState,
}

enum SelectFutState {
    Init,
    Armed {
        shared: Arc<SelectShared>,
        connections: Arc<Mutex<Vec<Connection>>>,
        _sub: Option<Subscription>,
    },
    NeverReady,
    Done,
}

impl Future for Select<'_> {
    type Output = Result<usize, SelectError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                SelectFutState::Init => {
                    if let Some(reason) = this.signal.as_ref().and_then(CancelSignal::reason) {
                        this.state = SelectFutState::Done;
                        return Poll::Ready(Err(SelectError::Cancelled(reason)));
                    }
                    if this.cases.is_empty() && this.signal.is_none() {
                        this.state = SelectFutState::NeverReady;
                        return Poll::Pending;
                    }

                    for (_, case) in &this.cases {
                        case.reset();
                    }
                    let mut order = this.cases.clone();
                    let mut rng = Rng::from_entropy();
                    rng.shuffle(&mut order);

                    for (index, case) in &order {
                        if case.try_fire() {
                            this.state = SelectFutState::Done;
                            return Poll::Ready(Ok(*index));
                        }
                    }

                    let shared = SelectShared::new();
                    shared.state.lock().waker = Some(cx.waker().clone());
                    let connections = Arc::new(Mutex::new(Vec::with_capacity(order.len())));

                    // Arm in shuffled order. A case firing (or losing) while
                    // we arm decides the select; the remaining cases stay
                    // un-armed.
                    for (index, case) in &order {
                        match case.arm(&shared, *index) {
                            ArmOutcome::Fired | ArmOutcome::Lost => break,
                            ArmOutcome::Parked(connection) => {
                                connections.lock().push(connection);
                            }
                        }
                    }

                    let sub = this.signal.as_ref().map(|signal| {
                        let shared = Arc::clone(&shared);
                        let connections = Arc::clone(&connections);
                        signal.subscribe(move |reason| {
                            if shared.claim_cancelled() {
                                for connection in connections.lock().iter_mut() {
                                    connection.disconnect();
                                }
                                shared.finish(SelectDone::Cancelled(reason));
                            }
                        })
                    });

                    this.state = SelectFutState::Armed {
                        shared,
                        connections,
                        _sub: sub,
                    };
                    // Check for a resolution that raced with arming.
                }
                SelectFutState::Armed {
                    shared,
                    connections,
                    ..
                } => {
                    let shared = Arc::clone(shared);
                    let connections = Arc::clone(connections);
                    let done = {
                        let mut state = shared.state.lock();
                        if state.done.is_none() {
                            state.waker = Some(cx.waker().clone());
                        }
                        state.done.clone()
                    };
                    return match done {
                        Some(SelectDone::Won(index)) => {
                            for connection in connections.lock().iter_mut() {
                                connection.disconnect();
                            }
                            this.state = SelectFutState::Done;
                            Poll::Ready(Ok(index))
                        }
                        Some(SelectDone::Cancelled(reason)) => {
                            for connection in connections.lock().iter_mut() {
                                connection.disconnect();
                            }
                            this.state = SelectFutState::Done;
                            Poll::Ready(Err(SelectError::Cancelled(reason)))
                        }
                        None => Poll::Pending,
                    };
                }
                SelectFutState::NeverReady => return Poll::Pending,
                SelectFutState::Done => panic!("Select polled after completion"),
            }
        }
    }
}
