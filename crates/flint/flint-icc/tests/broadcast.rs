use flint_events::Beacon;
use flint_icc::BroadcastRing;
use flint_icc::wait::Deadline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// A reader that keeps up sees every value in order. The writer waits for
/// the reader's acknowledgement every half ring, so it can never lap it.
#[test]
fn fast_reader_sees_every_value_in_order() {
    const COUNT: u64 = 100_000;
    const N: usize = 64;
    let ring = BroadcastRing::<Beacon, N>::new_boxed();
    let mut reader = ring.reader();
    let acked = std::sync::atomic::AtomicU64::new(0);

    thread::scope(|s| {
        s.spawn(|| {
            let mut w = ring.writer().unwrap();
            for i in 0..COUNT {
                while i - acked.load(Ordering::Acquire) >= (N / 2) as u64 {
                    std::hint::spin_loop();
                }
                w.publish(Beacon::new(0, i));
            }
        });
        s.spawn(|| {
            for expected in 0..COUNT {
                let b = loop {
                    if let Some(b) = reader.read() {
                        break b;
                    }
                    std::hint::spin_loop();
                };
                assert_eq!(b.idx, expected);
                assert!(b.is_consistent());
                acked.store(expected + 1, Ordering::Release);
            }
            assert_eq!(reader.overruns(), 0);
        });
    });
}

/// A reader that only polls every other publish sees a strictly increasing
/// subsequence, never a torn value.
#[test]
fn half_rate_reader_sees_strict_subsequence() {
    let ring = BroadcastRing::<Beacon, 8>::new();
    let mut reader = ring.reader();
    let mut w = ring.writer().unwrap();

    let mut seen = Vec::new();
    for i in 0..1_000u64 {
        w.publish(Beacon::new(0, i));
        if i % 2 == 1 {
            if let Some(b) = reader.read() {
                assert!(b.is_consistent());
                seen.push(b.idx);
            }
        }
    }
    assert!(seen.windows(2).all(|p| p[0] < p[1]));
    assert!(seen.len() < 1_000);
    assert!(!seen.is_empty());
}

/// Readers racing a writer that laps them constantly never return a torn
/// beacon, and their indices never go backwards.
#[test]
fn lapped_readers_never_see_torn_values() {
    let ring = BroadcastRing::<Beacon, 4>::new_boxed();
    let readers: Vec<_> = (0..3).map(|_| ring.reader()).collect();
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for mut r in readers {
            let done = &done;
            s.spawn(move || {
                let mut last = None;
                let mut got = 0u64;
                while !done.load(Ordering::Acquire) {
                    if let Some(b) = r.read() {
                        assert!(b.is_consistent(), "torn beacon {b:?}");
                        if let Some(prev) = last {
                            assert!(b.idx > prev);
                        }
                        last = Some(b.idx);
                        got += 1;
                    }
                }
                got
            });
        }
        s.spawn(|| {
            let mut w = ring.writer().unwrap();
            for i in 0..200_000u64 {
                w.publish(Beacon::new(0, i));
            }
            done.store(true, Ordering::Release);
        });
    });
}

/// Two readers at different positions both drain to "nothing new" and do
/// not disturb each other.
#[test]
fn readers_at_different_positions_converge() {
    let ring = BroadcastRing::<u64, 16>::new();
    let mut early = ring.reader();
    let mut w = ring.writer().unwrap();
    for i in 0..5 {
        w.publish(i);
    }
    let mut late = ring.reader();
    for i in 5..10 {
        w.publish(i);
    }

    let early_seen: Vec<u64> = std::iter::from_fn(|| early.read()).collect();
    let late_seen: Vec<u64> = std::iter::from_fn(|| late.read()).collect();
    assert_eq!(early_seen, (0..10).collect::<Vec<_>>());
    assert_eq!(late_seen, (5..10).collect::<Vec<_>>());
    assert_eq!(early.read(), None);
    assert_eq!(late.read(), None);
    assert_eq!(early.next_cursor(), late.next_cursor());
}

#[test]
fn poll_waits_for_writer_or_gives_up() {
    let ring = BroadcastRing::<u32, 8>::new();
    let mut reader = ring.reader();

    assert_eq!(
        reader.poll(&mut Deadline::after(Duration::from_millis(1))),
        None
    );

    thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(2));
            ring.writer().unwrap().publish(17);
        });
        assert_eq!(
            reader.poll(&mut Deadline::after(Duration::from_secs(5))),
            Some(17)
        );
    });
}

#[test]
fn read_last_gives_latest_value() {
    let ring = BroadcastRing::<u64, 8>::new();
    let mut reader = ring.reader();
    let mut w = ring.writer().unwrap();
    for i in 0..20 {
        w.publish(i);
    }
    assert_eq!(reader.read_last(), Some(19));
    assert_eq!(reader.read_last(), None);
}

/// Starting behind the ring's oldest entry counts the lost cursors as an
/// overrun on the first read; starting on a live cursor loses nothing.
#[test]
fn reader_from_early_cursor_counts_overrun() {
    let ring = BroadcastRing::<u64, 4>::new();
    let mut w = ring.writer().unwrap();
    // Cursors 1..=10; the ring now holds cursors 7..=10.
    for i in 1..=10 {
        w.publish(i * 10);
    }

    let mut from_start = ring.reader_from(1);
    assert_eq!(from_start.read(), Some(90));
    assert_eq!(from_start.overruns(), 8);
    assert_eq!(from_start.read(), Some(100));
    assert_eq!(from_start.read(), None);

    let mut from_live = ring.reader_from(7);
    let seen: Vec<u64> = std::iter::from_fn(|| from_live.read()).collect();
    assert_eq!(seen, vec![70, 80, 90, 100]);
    assert_eq!(from_live.overruns(), 0);
}

#[test]
fn reader_from_zero_on_unwritten_ring_sees_nothing() {
    let boxed = BroadcastRing::<u64, 4>::new_boxed();
    assert_eq!(boxed.reader_from(0).read(), None);

    let ring = BroadcastRing::<u64, 4>::new();
    let mut r = ring.reader_from(0);
    assert_eq!(r.read(), None);
    assert_eq!(r.next_cursor(), 1);

    ring.writer().unwrap().publish(5);
    assert_eq!(r.read(), Some(5));
    assert_eq!(r.overruns(), 0);
}

#[test]
fn reader_from_future_cursor_waits_for_it() {
    let ring = BroadcastRing::<u64, 4>::new();
    let mut w = ring.writer().unwrap();
    for i in 1..=3 {
        w.publish(i);
    }
    let mut r = ring.reader_from(6);
    assert_eq!(r.read(), None);
    for i in 4..=5 {
        w.publish(i);
    }
    assert_eq!(r.read(), None);
    w.publish(6);
    assert_eq!(r.read(), Some(6));
}
