use flint_icc::RingBuffer;
use flint_icc::wait::{Cancel, Deadline};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Capacity-8 boundary: eight pushes fill the ring, a ninth fails, one pop
/// frees exactly one slot.
#[test]
fn full_ring_accepts_again_after_one_pop() {
    let mut ring = RingBuffer::<u64, 8>::new();
    let (mut tx, mut rx) = ring.split();

    for i in 0..8 {
        assert!(tx.try_push(i).is_ok(), "push {i} should fit");
    }
    assert!(tx.alloc().is_none());
    assert_eq!(tx.try_push(8), Err(8));

    assert!(rx.pop());
    assert!(tx.try_push(8).is_ok());

    let drained: Vec<u64> = std::iter::from_fn(|| rx.try_pop()).collect();
    assert_eq!(drained, (1..=8).collect::<Vec<_>>());
}

#[test]
fn cursors_keep_working_across_many_wraps() {
    let mut ring = RingBuffer::<u32, 4>::new();
    let (mut tx, mut rx) = ring.split();
    for round in 0..100u32 {
        for i in 0..3 {
            tx.try_push(round * 10 + i).unwrap();
        }
        for i in 0..3 {
            assert_eq!(rx.try_pop(), Some(round * 10 + i));
        }
        assert!(rx.front().is_none());
    }
}

/// FIFO under a real producer/consumer pair, values checked on the consumer.
#[test]
fn threaded_fifo_order() {
    const COUNT: u64 = 200_000;
    let mut ring = RingBuffer::<u64, 64>::new_boxed();
    let (mut tx, mut rx) = ring.split();

    thread::scope(|s| {
        s.spawn(move || {
            for i in 0..COUNT {
                tx.block_push(i);
            }
        });
        s.spawn(move || {
            let mut expected = 0;
            while expected < COUNT {
                if let Some(v) = rx.front() {
                    assert_eq!(*v, expected);
                    assert!(rx.pop());
                    expected += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
            assert!(rx.try_pop().is_none());
        });
    });
}

/// Two-phase producer: a value written into an allocated slot is only seen
/// by the consumer once the push publishes it.
#[test]
fn threaded_two_phase_publication() {
    const COUNT: u64 = 50_000;
    let mut ring = RingBuffer::<[u64; 4], 16>::new_boxed();
    let (mut tx, mut rx) = ring.split();

    thread::scope(|s| {
        s.spawn(move || {
            let mut i = 0;
            while i < COUNT {
                let Some(slot) = tx.alloc() else {
                    std::hint::spin_loop();
                    continue;
                };
                slot.write([i, i + 1, i + 2, i + 3]);
                unsafe { tx.push() };
                i += 1;
            }
        });
        s.spawn(move || {
            let mut i = 0;
            while i < COUNT {
                if rx.try_pop_with(|v| assert_eq!(*v, [i, i + 1, i + 2, i + 3])) {
                    i += 1;
                }
            }
        });
    });
}

#[test]
fn block_push_with_cancels_on_flag() {
    let mut ring = RingBuffer::<u8, 2>::new();
    let (mut tx, _rx) = ring.split();
    tx.try_push(1).unwrap();
    tx.try_push(2).unwrap();

    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(5));
            stop.store(true, Ordering::Relaxed);
        });
        assert_eq!(tx.block_push_with(3, &mut Cancel::new(&stop)), Err(3));
    });
}

#[test]
fn block_push_with_succeeds_once_consumer_drains() {
    let mut ring = RingBuffer::<u8, 1>::new();
    let (mut tx, mut rx) = ring.split();
    tx.try_push(1).unwrap();

    thread::scope(|s| {
        s.spawn(move || {
            thread::sleep(Duration::from_millis(2));
            assert_eq!(rx.try_pop(), Some(1));
        });
        let mut wait = Deadline::after(Duration::from_secs(5));
        assert_eq!(tx.block_push_with(2, &mut wait), Ok(()));
    });
    assert_eq!(ring.len(), 1);
}
