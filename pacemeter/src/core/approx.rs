//! Approximate durations
//!
//! Throttling waits are computed to the nanosecond, which makes for noisy
//! reports. [`ApproxDuration`] truncates a duration to a precision chosen
//! from its own magnitude.

use std::time::Duration;

const NANOSECOND: Duration = Duration::from_nanos(1);
const MICROSECOND: Duration = Duration::from_micros(1);
const MILLISECOND: Duration = Duration::from_millis(1);
const SECOND: Duration = Duration::from_secs(1);

/// Truncation helpers for [`Duration`]
///
/// # Example
///
/// ```
/// use pacemeter::ApproxDuration;
/// use std::time::Duration;
///
/// let wait = Duration::from_nanos(1_532_456_789);
/// assert_eq!(wait.in_seconds(), Duration::from_secs(1));
/// assert_eq!(wait.in_auto_units(Duration::from_millis(1)), Duration::from_millis(1532));
/// ```
pub trait ApproxDuration {
    /// Truncates to a whole multiple of `units`
    fn truncate_to(self, units: Duration) -> Duration;

    /// Truncates to the unit of the duration's own magnitude (ns below 1µs,
    /// µs below 1ms, ms below 1s, s above), never coarser than `max_precision`
    fn in_auto_units(self, max_precision: Duration) -> Duration;

    /// [`in_auto_units`](ApproxDuration::in_auto_units) capped at one second
    fn in_seconds(self) -> Duration;
}

impl ApproxDuration for Duration {
    fn truncate_to(self, units: Duration) -> Duration {
        let unit_nanos = units.as_nanos();
        if unit_nanos == 0 {
            return self;
        }
        let nanos = self.as_nanos() / unit_nanos * unit_nanos;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn in_auto_units(self, max_precision: Duration) -> Duration {
        let precision = if self < MICROSECOND {
            NANOSECOND
        } else if self < MILLISECOND {
            MICROSECOND
        } else if self < SECOND {
            MILLISECOND
        } else {
            SECOND
        };
        self.truncate_to(precision.min(max_precision))
    }

    fn in_seconds(self) -> Duration {
        self.in_auto_units(SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_units() {
        let d = Duration::from_millis(2_750);
        assert_eq!(d.truncate_to(SECOND), Duration::from_secs(2));
        assert_eq!(d.truncate_to(Duration::from_millis(500)), Duration::from_millis(2_500));
        assert_eq!(d.truncate_to(Duration::ZERO), d);
    }

    #[test]
    fn test_auto_units_follow_magnitude() {
        assert_eq!(
            Duration::from_nanos(999).in_auto_units(SECOND),
            Duration::from_nanos(999)
        );
        assert_eq!(
            Duration::from_nanos(12_345).in_auto_units(SECOND),
            Duration::from_micros(12)
        );
        assert_eq!(
            Duration::from_micros(45_678).in_auto_units(SECOND),
            Duration::from_millis(45)
        );
        assert_eq!(
            Duration::from_millis(3_999).in_auto_units(SECOND),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_auto_units_capped_by_max_precision() {
        // Seconds-sized value, but no coarser than milliseconds
        assert_eq!(
            Duration::from_micros(3_999_999).in_auto_units(MILLISECOND),
            Duration::from_millis(3_999)
        );
        assert_eq!(Duration::from_micros(3_999_999).in_seconds(), Duration::from_secs(3));
    }
}
