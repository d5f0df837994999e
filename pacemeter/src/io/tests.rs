use super::ThrottledReader;
use crate::core::{ErrorKind, ManualClock, ThrottleError, ThrottleMode, Throttler};
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

/// Reader that advances a manual clock by a fixed amount per read
struct SlowReader {
    data: io::Cursor<Vec<u8>>,
    clock: Arc<ManualClock>,
    per_read: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.clock.advance(self.per_read);
        self.data.read(buf)
    }
}

struct FailingReader;

impl Read for FailingReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
    }
}

fn setup(max_rate: f64) -> (Arc<ManualClock>, Throttler, crate::core::Quantity) {
    let clock = Arc::new(ManualClock::new());
    let root = Throttler::builder().clock(clock.clone()).build().unwrap();
    let bytes = root
        .define_throttled_quantity("bytes", max_rate, ThrottleMode::Average)
        .unwrap();
    (clock, root, bytes)
}

#[test]
fn test_reader_passes_data_through() {
    let (_clock, root, bytes) = setup(0.0);
    let mut reader = ThrottledReader::new(&b"throttled bytes"[..], bytes.clone());

    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();

    assert_eq!(out, b"throttled bytes");
    assert_eq!(bytes.value(), 15.0);
    assert!(!root.is_operation_in_progress());
}

#[test]
fn test_reader_limits_throughput() {
    let (clock, root, bytes) = setup(1_000.0);
    let inner = SlowReader {
        data: io::Cursor::new(vec![7u8; 10_000]),
        clock: clock.clone(),
        per_read: Duration::from_millis(10),
    };
    let mut reader = ThrottledReader::new(inner, bytes.clone());

    let mut buf = [0u8; 500];
    let mut total = 0;
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }

    assert_eq!(total, 10_000);
    assert_eq!(bytes.value(), 10_000.0);
    // 10_000 bytes at 1000/s take ten seconds
    let elapsed = root.elapsed_time();
    assert!(elapsed >= Duration::from_millis(9_999), "elapsed {elapsed:?}");
    assert!(bytes.average_rate() <= 1_000.0 * (1.0 + 1e-5));
    assert!(root.total_wait_time() > Duration::from_secs(9));
}

#[test]
fn test_reader_scales_by_rate_units() {
    let (_clock, _root, bytes) = setup(0.0);
    bytes
        .set_units("KiB", "KiB/s", 1024.0, Duration::from_secs(1))
        .unwrap();
    let mut reader = ThrottledReader::new(io::Cursor::new(vec![0u8; 2048]), bytes.clone());

    io::copy(&mut reader, &mut io::sink()).unwrap();
    assert_eq!(bytes.value(), 2.0);
}

#[test]
fn test_reader_joins_caller_bracket() {
    let (clock, root, bytes) = setup(100.0);
    let mut reader = ThrottledReader::new(io::Cursor::new(vec![1u8; 100]), bytes.clone());

    root.start_operation().unwrap();
    let mut buf = [0u8; 50];
    clock.advance(Duration::from_secs(1));
    reader.read_exact(&mut buf).unwrap();
    assert!(root.is_operation_in_progress());
    assert!(root.holds_operation());

    clock.advance(Duration::from_secs(1));
    reader.read_exact(&mut buf).unwrap();
    let pause = root.stop_operation().unwrap();
    assert!(!pause.is_needed());
    assert_eq!(bytes.value(), 100.0);
}

#[test]
fn test_reader_propagates_inner_errors() {
    let (_clock, root, bytes) = setup(10.0);
    let mut reader = ThrottledReader::new(FailingReader, bytes);

    let err = reader.read(&mut [0u8; 8]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    assert!(!root.is_operation_in_progress());
}

#[test]
fn test_reader_reports_contract_errors() {
    let (_clock, root, bytes) = setup(10.0);
    root.freeze().unwrap();
    let mut reader = ThrottledReader::new(&b"data"[..], bytes);

    let err = reader.read(&mut [0u8; 4]).unwrap_err();
    let inner = err
        .get_ref()
        .and_then(|e| e.downcast_ref::<ThrottleError>())
        .unwrap();
    assert_eq!(inner.kind(), ErrorKind::InvalidState);
    assert_eq!(reader.into_inner(), b"data");
}
