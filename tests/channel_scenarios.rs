//! End-to-end channel scenarios: buffered FIFO, rendezvous handoff, close
//! semantics, cancellation, and exactly-once delivery under contention.

use cspchan::util::block_on::{block_on, block_on_timeout, poll_now};
use cspchan::{
    CancelReason, CancelSource, Channel, RecvError, SendError, TryRecvError, TrySendError,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Give a spawned thread time to reach its parking point.
fn settle() {
    thread::sleep(Duration::from_millis(50));
}

#[test]
fn buffered_store_and_load() {
    let ch: Channel<u32> = Channel::new(2);
    ch.try_send(1).expect("slot 1");
    ch.try_send(2).expect("slot 2");
    assert_eq!(ch.try_send(3), Err(TrySendError::Full(3)));

    assert_eq!(ch.try_recv(), Ok(1));
    assert_eq!(ch.len(), 1);
    assert_eq!(ch.try_recv(), Ok(2));
    assert_eq!(ch.len(), 0);
}

#[test]
fn buffered_fifo_order_across_refills() {
    let ch: Channel<u32> = Channel::new(4);
    let mut expected = Vec::new();
    let mut got = Vec::new();
    for round in 0..8 {
        for i in 0..4 {
            let v = round * 10 + i;
            ch.try_send(v).expect("room");
            expected.push(v);
        }
        for _ in 0..4 {
            got.push(ch.try_recv().expect("buffered"));
        }
    }
    assert_eq!(got, expected);
}

#[test]
fn unbuffered_handoff_delivers_once() {
    let ch: Channel<u32> = Channel::new(0);
    let reader = {
        let ch = ch.clone();
        thread::spawn(move || block_on(ch.recv()))
    };
    settle();

    assert_eq!(block_on(ch.send(100)), Ok(()));
    assert_eq!(reader.join().expect("reader"), Ok(Some(100)));
}

#[test]
fn unbuffered_send_blocks_until_a_reader_arrives() {
    let ch: Channel<u32> = Channel::new(0);
    let finished = Arc::new(AtomicBool::new(false));

    let writer = {
        let ch = ch.clone();
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            block_on(ch.send(7)).expect("send");
            finished.store(true, Ordering::SeqCst);
        })
    };

    for _ in 0..1_000 {
        thread::yield_now();
    }
    assert!(
        !finished.load(Ordering::SeqCst),
        "send completed without a reader"
    );

    assert_eq!(block_on(ch.recv()), Ok(Some(7)));
    writer.join().expect("writer");
    assert!(finished.load(Ordering::SeqCst));
}

#[test]
fn close_while_parked_reader() {
    let ch: Channel<u32> = Channel::new(0);
    let reader = {
        let ch = ch.clone();
        thread::spawn(move || block_on(ch.recv()))
    };
    settle();

    assert!(ch.close());
    assert_eq!(reader.join().expect("reader"), Ok(None));
    assert!(ch.is_closed());
}

#[test]
fn close_while_parked_writer_returns_value() {
    let ch: Channel<u32> = Channel::new(1);
    ch.try_send(1).expect("fill");
    let writer = {
        let ch = ch.clone();
        thread::spawn(move || block_on(ch.send(2)))
    };
    settle();

    assert!(ch.close());
    assert_eq!(writer.join().expect("writer"), Err(SendError::Closed(2)));
    // The buffered value survives the close.
    assert_eq!(ch.try_recv(), Ok(1));
    assert_eq!(ch.try_recv(), Err(TryRecvError::Closed));
}

#[test]
fn drained_slot_is_refilled_by_parked_writer() {
    let ch: Channel<u32> = Channel::new(1);
    ch.try_send(1).expect("fill");

    let writer = {
        let ch = ch.clone();
        thread::spawn(move || block_on(ch.send(2)))
    };
    settle();

    // The drain pulls the parked writer into the vacated slot.
    assert_eq!(ch.try_recv(), Ok(1));
    writer.join().expect("writer").expect("sent");
    assert_eq!(ch.len(), 1);
    assert_eq!(ch.try_recv(), Ok(2));
}

#[test]
fn close_is_idempotent() {
    let ch: Channel<u32> = Channel::new(1);
    assert!(ch.close());
    assert!(!ch.close());
    assert!(!ch.close());
}

#[test]
fn recv_after_close_drains_then_ends() {
    let ch: Channel<u32> = Channel::new(3);
    ch.try_send(1).expect("room");
    ch.try_send(2).expect("room");
    ch.close();

    assert_eq!(block_on(ch.recv()), Ok(Some(1)));
    assert_eq!(block_on(ch.recv()), Ok(Some(2)));
    assert_eq!(block_on(ch.recv()), Ok(None));
    assert_eq!(block_on(ch.recv()), Ok(None));
}

#[test]
fn cancel_during_parked_recv() {
    let ch: Channel<u32> = Channel::new(0);
    let source = CancelSource::new();
    let mut fut = ch.recv().with_signal(&source.signal());
    assert!(poll_now(&mut fut).is_pending());

    assert!(source.cancel(CancelReason::user("stop")));
    match block_on(fut) {
        Err(RecvError::Cancelled(reason)) => assert_eq!(reason.message(), "stop"),
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[test]
fn cancel_during_parked_send_returns_value() {
    let ch: Channel<u32> = Channel::new(0);
    let source = CancelSource::new();
    let mut fut = ch.send(41).with_signal(&source.signal());
    assert!(poll_now(&mut fut).is_pending());

    source.cancel(CancelReason::timeout("deadline"));
    match block_on(fut) {
        Err(SendError::Cancelled { value, reason }) => {
            assert_eq!(value, 41);
            assert_eq!(reason.message(), "deadline");
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
}

#[test]
fn cancelled_recv_leaves_channel_usable() {
    let ch: Channel<u32> = Channel::new(0);
    let source = CancelSource::new();
    let mut fut = ch.recv().with_signal(&source.signal());
    assert!(poll_now(&mut fut).is_pending());
    source.cancel(CancelReason::user("stop"));
    let _ = block_on(fut);

    // A fresh pair of operations still rendezvous.
    let reader = {
        let ch = ch.clone();
        thread::spawn(move || block_on(ch.recv()))
    };
    settle();
    assert_eq!(block_on(ch.send(5)), Ok(()));
    assert_eq!(reader.join().expect("reader"), Ok(Some(5)));
}

#[test]
fn value_won_before_cancellation_is_kept() {
    let ch: Channel<u32> = Channel::new(1);
    let source = CancelSource::new();
    let mut fut = ch.recv().with_signal(&source.signal());
    assert!(poll_now(&mut fut).is_pending());

    // Delivery commits before the cancellation fires.
    ch.try_send(6).expect("handoff");
    source.cancel(CancelReason::user("late"));
    assert_eq!(block_on(fut), Ok(Some(6)));
}

#[test]
fn recv_timeout_via_block_on_timeout() {
    let ch: Channel<u32> = Channel::new(0);
    assert_eq!(
        block_on_timeout(ch.recv(), Duration::from_millis(30)),
        None
    );
    // The timed-out future was dropped, disconnecting its waiter.
    assert_eq!(ch.try_send(1), Err(TrySendError::Full(1)));
}

#[test]
fn wait_closed_wakes_on_close() {
    let ch: Channel<u32> = Channel::new(0);
    let waiter = {
        let ch = ch.clone();
        thread::spawn(move || block_on(ch.wait_closed()))
    };
    settle();
    assert!(ch.close());
    waiter.join().expect("waiter");
}

#[test]
fn every_value_is_delivered_exactly_once() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: u32 = 50;

    let ch: Channel<u32> = Channel::new(8);
    let received: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let ch = ch.clone();
            let received = Arc::clone(&received);
            thread::spawn(move || {
                while let Ok(Some(value)) = block_on(ch.recv()) {
                    received.lock().unwrap().push(value);
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let ch = ch.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let v = u32::try_from(p).unwrap() * 1_000 + i;
                    block_on(ch.send(v)).expect("send");
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer");
    }
    ch.close();
    for consumer in consumers {
        consumer.join().expect("consumer");
    }

    let mut received = received.lock().unwrap().clone();
    received.sort_unstable();
    let mut expected: Vec<u32> = (0..PRODUCERS)
        .flat_map(|p| (0..PER_PRODUCER).map(move |i| u32::try_from(p).unwrap() * 1_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(received, expected);
}

#[test]
fn parked_readers_are_dispatched_randomly_not_fifo() {
    // Park several readers, feed values one at a time, and record which
    // reader gets which arrival. With 4 readers the chance that 6
    // independent trials all pick the earliest-parked reader first is
    // (1/4)^6 < 3e-4 per trial batch; we only assert that at least one
    // later-parked reader was served before an earlier one across the runs.
    const READERS: usize = 4;
    const TRIALS: usize = 6;

    let mut out_of_order = false;
    for _ in 0..TRIALS {
        let ch: Channel<u32> = Channel::new(0);
        let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

        let readers: Vec<_> = (0..READERS)
            .map(|i| {
                let ch = ch.clone();
                let order = Arc::clone(&order);
                let handle = thread::spawn(move || {
                    let got = block_on(ch.recv());
                    assert!(matches!(got, Ok(Some(_))));
                    order.lock().unwrap().push(i);
                });
                // Park strictly one after another.
                settle();
                handle
            })
            .collect();

        for _ in 0..READERS {
            block_on(ch.send(1)).expect("send");
            settle();
        }
        for reader in readers {
            reader.join().expect("reader");
        }

        let order = order.lock().unwrap().clone();
        assert_eq!(order.len(), READERS);
        if order.windows(2).any(|w| w[0] > w[1]) {
            out_of_order = true;
            break;
        }
    }
    assert!(
        out_of_order,
        "dispatch always matched park order across {TRIALS} trials"
    );
}

#[test]
fn length_never_exceeds_capacity_under_contention() {
    let ch: Channel<u32> = Channel::new(4);
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..3)
        .map(|_| {
            let ch = ch.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut i = 0;
                while !stop.load(Ordering::SeqCst) {
                    let _ = ch.try_send(i);
                    i += 1;
                }
            })
        })
        .collect();

    let mut observations = BTreeMap::new();
    for _ in 0..10_000 {
        let len = ch.len();
        *observations.entry(len).or_insert(0u32) += 1;
        assert!(len <= ch.capacity());
        let _ = ch.try_recv();
    }
    stop.store(true, Ordering::SeqCst);
    for writer in writers {
        writer.join().expect("writer");
    }
    assert!(!observations.is_empty());
}
