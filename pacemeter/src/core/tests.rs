use super::{ApproxDuration, Clock, ManualClock, ThrottleMode, Throttler};
use std::sync::Arc;
use std::time::Duration;

fn manual_root() -> (Arc<ManualClock>, Throttler) {
    let clock = Arc::new(ManualClock::new());
    let root = Throttler::builder().clock(clock.clone()).build().unwrap();
    (clock, root)
}

#[test]
fn test_sustained_load_respects_average_rate() {
    let (clock, root) = manual_root();
    let bytes = root
        .define_throttled_quantity("bytes", 100.0, ThrottleMode::Average)
        .unwrap();

    let mut waited = 0;
    for i in 0..200 {
        root.start_operation().unwrap();
        bytes.update(20.0 + (i % 7) as f64 * 10.0).unwrap();
        clock.advance(Duration::from_millis(50));
        let mut pause = root.stop_operation().unwrap();
        if pause.is_needed() {
            waited += 1;
        }
        pause.wait();

        // One microsecond of floor at most
        assert!(
            bytes.average_rate() <= 100.0 * (1.0 + 1e-5),
            "iteration {i}: average rate {}",
            bytes.average_rate()
        );
    }
    assert!(waited > 100);
}

#[test]
fn test_sustained_load_through_a_tree() {
    let (clock, root) = manual_root();
    let service = root.child("service");
    let worker = service.child("worker");
    let ops = worker
        .define_throttled_quantity("ops", 10.0, ThrottleMode::Both)
        .unwrap();

    for _ in 0..50 {
        worker.start_operation().unwrap();
        ops.update(1.0).unwrap();
        clock.advance(Duration::from_millis(10));
        worker.stop_operation().unwrap().wait();
    }

    assert!(ops.average_rate() <= 10.0 * (1.0 + 1e-5));
    assert_eq!(worker.total_wait_time(), service.total_wait_time());
    assert_eq!(service.total_wait_time(), root.total_wait_time());
    // The clock only moved by work and by waits
    let busy = Duration::from_millis(500);
    assert!(root.total_wait_time() + busy >= clock.offset() - Duration::from_micros(50));
}

#[test]
fn test_child_limits_are_independent() {
    let (clock, root) = manual_root();
    let fast = root.child("fast");
    let slow = root.child("slow");
    let fast_bytes = fast
        .define_throttled_quantity("bytes", 1_000.0, ThrottleMode::Average)
        .unwrap();
    let slow_bytes = slow
        .define_throttled_quantity("bytes", 10.0, ThrottleMode::Average)
        .unwrap();

    fast.start_operation().unwrap();
    slow.start_operation().unwrap();
    fast_bytes.update(500.0).unwrap();
    slow_bytes.update(500.0).unwrap();
    clock.advance(Duration::from_secs(1));
    let fast_pause = fast.stop_operation().unwrap();
    let slow_pause = slow.stop_operation().unwrap();

    assert!(fast_pause.quantity().is_none());
    assert_eq!(slow_pause.quantity(), Some(&slow_bytes));
    assert_eq!(slow_pause.amount().in_seconds(), Duration::from_secs(49));
}

#[test]
fn test_pause_display() {
    let (clock, root) = manual_root();
    let bytes = root
        .define_throttled_quantity("bytes", 100.0, ThrottleMode::Both)
        .unwrap();
    bytes
        .set_units("B", "B/s", 1.0, Duration::from_secs(1))
        .unwrap();

    root.start_operation().unwrap();
    let idle = root.stop_operation().unwrap();
    assert_eq!(idle.to_string(), "no throttling");

    clock.advance(Duration::from_secs(1));
    root.start_operation().unwrap();
    bytes.update(300.0).unwrap();
    clock.advance(Duration::from_secs(1));
    let pause = root.stop_operation().unwrap();
    assert_eq!(
        pause.to_string(),
        "throttling on bytes for 2s, reason: instant rate=300.000>100.000 B/s"
    );
}

#[test]
fn test_manual_clock_saturates() {
    let clock = ManualClock::new();
    let start = clock.now();
    clock.advance(Duration::from_secs(1));
    clock.sleep(Duration::MAX);
    clock.advance(Duration::from_secs(1));

    assert_eq!(clock.offset(), Duration::from_nanos(u64::MAX));
    assert!(clock.now() > start + Duration::from_secs(1));
}
