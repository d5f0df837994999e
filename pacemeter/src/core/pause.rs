use std::fmt;
use std::time::Duration;

use super::approx::ApproxDuration;
use super::quantity::Quantity;

/// Which check produced a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// The rate of the last lapse exceeded the maximum
    Instant,
    /// The rate since the throttler was created exceeded the maximum
    Average,
}

/// The wait a closed lapse must honor
///
/// Returned by [`Throttler::stop_operation`](super::Throttler::stop_operation)
/// and handed to update callbacks. The amount is the largest wait required
/// by any quantity of the throttler, so honoring it once satisfies all of
/// them. Waiting consumes the pause: a second [`wait`](Pause::wait) returns
/// immediately.
#[derive(Debug)]
pub struct Pause {
    quantity: Option<Quantity>,
    amount: Duration,
    reason: PauseReason,
    actual_rate: f64,
}

impl Pause {
    pub(crate) fn new(
        quantity: Option<Quantity>,
        amount: Duration,
        reason: PauseReason,
        actual_rate: f64,
    ) -> Self {
        Pause {
            quantity,
            amount,
            reason,
            actual_rate,
        }
    }

    /// The quantity whose limit triggered the wait, or `None` when every
    /// quantity is within bounds
    pub fn quantity(&self) -> Option<&Quantity> {
        self.quantity.as_ref()
    }

    /// Remaining wait
    pub fn amount(&self) -> Duration {
        self.amount
    }

    pub fn reason(&self) -> PauseReason {
        self.reason
    }

    /// The measured rate that exceeded the maximum, in the quantity's units
    pub fn actual_rate(&self) -> f64 {
        self.actual_rate
    }

    /// Whether honoring this pause would block
    pub fn is_needed(&self) -> bool {
        self.quantity.is_some() && !self.amount.is_zero()
    }

    /// Blocks until the pause has elapsed
    ///
    /// The sleep is performed by the root of the throttler tree; every
    /// throttler between the quantity's owner and the root books the wait.
    pub fn wait(&mut self) {
        if let Some(qty) = &self.quantity {
            qty.node().pause(self.amount);
        }
        self.amount = Duration::ZERO;
    }
}

impl fmt::Display for Pause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.quantity {
            None => write!(f, "no throttling"),
            Some(qty) => {
                let reason = match self.reason {
                    PauseReason::Instant => "instant ",
                    PauseReason::Average => "",
                };
                write!(
                    f,
                    "throttling on {} for {:?}, reason: {}rate={:.3}>{:.3} {}",
                    qty.name(),
                    self.amount.in_auto_units(Duration::from_millis(1)),
                    reason,
                    self.actual_rate,
                    qty.max_rate(),
                    qty.speed_units_name(),
                )
            }
        }
    }
}
