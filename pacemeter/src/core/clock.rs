//! Time source for a throttler tree
//!
//! Every node of a tree reads time and performs its blocking wait through the
//! same [`Clock`], chosen when the root is built. [`SystemClock`] is the real
//! monotonic clock; [`ManualClock`] only moves when told to, which makes rate
//! arithmetic exact in tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Reads the current instant and blocks the calling thread
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant in time.
    fn now(&self) -> Instant;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Standard monotonic clock backed by [`Instant::now`] and [`std::thread::sleep`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only advances when asked to
///
/// [`Clock::sleep`] returns immediately after advancing the clock by the
/// requested duration, so a throttler driven by a `ManualClock` never blocks.
///
/// # Example
///
/// ```
/// use pacemeter::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(2));
/// clock.sleep(Duration::from_millis(500));
/// assert_eq!(clock.now() - start, Duration::from_millis(2500));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `duration`, saturating at `u64::MAX` nanos
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_add(nanos))
            });
    }

    /// Total time this clock has been advanced since creation
    pub fn offset(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.offset()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
