//! Metered quantities
//!
//! A [`Quantity`] is a named counter owned by a [`Throttler`]. Callers report
//! consumption with [`Quantity::update`]; the throttler folds those increments
//! into the running total whenever it closes a lapse, and compares the
//! resulting rate against the quantity's maximum.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::throttler::Throttler;
use super::throttler::node::Node;
use super::{OperationState, Result, ThrottleError};

/// Which measured rate a quantity is limited on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleMode {
    /// Rate of the last lapse alone
    Instant,
    /// Rate since the throttler was created
    #[default]
    Average,
    /// Both checks; the larger wait wins
    Both,
}

impl std::str::FromStr for ThrottleMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "instant" => Ok(ThrottleMode::Instant),
            "average" => Ok(ThrottleMode::Average),
            "both" => Ok(ThrottleMode::Both),
            _ => Err(format!(
                "invalid throttle mode: {s}. Valid options are: instant, average, both"
            )),
        }
    }
}

impl fmt::Display for ThrottleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleMode::Instant => write!(f, "instant"),
            ThrottleMode::Average => write!(f, "average"),
            ThrottleMode::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct QuantityState {
    pub(crate) name: String,
    pub(crate) max_rate: f64,
    pub(crate) mode: ThrottleMode,
    pub(crate) current_value: f64,
    pub(crate) last_increment: f64,
    pub(crate) last_update: Option<Instant>,
    pub(crate) rate_units: f64,
    pub(crate) time_units: Duration,
    pub(crate) units_name: String,
    pub(crate) speed_units_name: String,
}

impl QuantityState {
    pub(crate) fn new(name: String, max_rate: f64, mode: ThrottleMode) -> Self {
        QuantityState {
            name,
            max_rate,
            mode,
            current_value: 0.0,
            last_increment: 0.0,
            last_update: None,
            rate_units: 1.0,
            time_units: Duration::from_secs(1),
            units_name: String::new(),
            speed_units_name: String::new(),
        }
    }
}

pub(crate) fn validate_max_rate(max_rate: f64) -> Result<()> {
    if max_rate.is_finite() && max_rate >= 0.0 {
        Ok(())
    } else {
        Err(ThrottleError::OutOfRange {
            what: "max rate",
            value: max_rate,
        })
    }
}

fn ratio(value: f64, time_units: Duration, interval: Duration) -> f64 {
    if interval.is_zero() {
        0.0
    } else {
        value * time_units.as_secs_f64() / interval.as_secs_f64()
    }
}

/// Handle to a quantity defined on a [`Throttler`]
///
/// Handles are cheap to clone and keep the owning throttler alive.
///
/// # Example
///
/// ```
/// use pacemeter::{ThrottleMode, Throttler};
/// use std::time::Duration;
///
/// let throttler = Throttler::root("downloads");
/// let bytes = throttler
///     .define_throttled_quantity("bytes", 64.0, ThrottleMode::Average)
///     .unwrap();
/// bytes.set_units("KiB", "KiB/s", 1024.0, Duration::from_secs(1)).unwrap();
///
/// throttler.start_operation().unwrap();
/// bytes.update(4.0).unwrap();
/// assert_eq!(bytes.value(), 4.0);
/// let mut pause = throttler.stop_operation().unwrap();
/// pause.wait();
/// ```
#[derive(Clone)]
pub struct Quantity {
    node: Arc<Node>,
    index: usize,
    name: Arc<str>,
}

impl Quantity {
    pub(crate) fn new(node: Arc<Node>, index: usize, name: &str) -> Self {
        Quantity {
            node,
            index,
            name: Arc::from(name),
        }
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    fn read<T>(&self, f: impl FnOnce(&QuantityState) -> T) -> T {
        let state = self.node.state.lock();
        f(&state.quantities[self.index])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The throttler this quantity belongs to
    pub fn throttler(&self) -> Throttler {
        Throttler::from_node(Arc::clone(&self.node))
    }

    /// Records consumption during the current operation
    ///
    /// Increments reported in the same lapse add up. The total is only
    /// updated when the lapse is closed by `throttle` or `stop_operation`.
    pub fn update(&self, increment: f64) -> Result<()> {
        if !increment.is_finite() || increment < 0.0 {
            return Err(ThrottleError::OutOfRange {
                what: "increment",
                value: increment,
            });
        }
        let now = self.node.now();
        let mut state = self.node.state.lock();
        state.ensure_started(&self.node, "update")?;
        let qty = &mut state.quantities[self.index];
        qty.last_increment += increment;
        qty.last_update = Some(now);
        Ok(())
    }

    /// Accumulated total, including the in-flight increment while an
    /// operation is in progress
    pub fn value(&self) -> f64 {
        let state = self.node.state.lock();
        let qty = &state.quantities[self.index];
        if state.in_progress() {
            qty.current_value + qty.last_increment
        } else {
            qty.current_value
        }
    }

    /// Rate of the latest increment
    ///
    /// While an operation is running the increment is measured against the
    /// time since it was reported; once stopped, against the last lapse.
    /// Returns 0 when the interval is empty.
    pub fn instant_rate(&self) -> f64 {
        let now = self.node.now();
        let state = self.node.state.lock();
        let qty = &state.quantities[self.index];
        if state.in_progress() {
            let since_update = qty
                .last_update
                .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
            ratio(qty.last_increment, qty.time_units, since_update)
        } else {
            ratio(qty.last_increment, qty.time_units, state.last_lapse)
        }
    }

    /// Rate of the accumulated total since the throttler was created
    pub fn average_rate(&self) -> f64 {
        let now = self.node.now();
        let state = self.node.state.lock();
        let qty = &state.quantities[self.index];
        let value = if state.in_progress() {
            qty.current_value + qty.last_increment
        } else {
            qty.current_value
        };
        ratio(value, qty.time_units, state.elapsed(now))
    }

    /// Configures how values and rates of this quantity are scaled and named
    ///
    /// `rate_units` is the number of raw units per value unit (the I/O
    /// reader divides byte counts by it); `time_units` is the period rates
    /// are expressed per. Only allowed while the throttler is stopped.
    pub fn set_units(
        &self,
        units_name: &str,
        speed_units_name: &str,
        rate_units: f64,
        time_units: Duration,
    ) -> Result<()> {
        if !rate_units.is_finite() || rate_units <= 0.0 {
            return Err(ThrottleError::OutOfRange {
                what: "rate units",
                value: rate_units,
            });
        }
        if time_units.is_zero() {
            return Err(ThrottleError::OutOfRange {
                what: "time units",
                value: 0.0,
            });
        }
        let mut state = self.node.state.lock();
        state.ensure_stopped(&self.node, "set_units")?;
        let qty = &mut state.quantities[self.index];
        qty.units_name = units_name.to_string();
        qty.speed_units_name = speed_units_name.to_string();
        qty.rate_units = rate_units;
        qty.time_units = time_units;
        Ok(())
    }

    /// Changes the maximum rate; 0 lifts the limit
    pub fn set_max_rate(&self, max_rate: f64) -> Result<()> {
        validate_max_rate(max_rate)?;
        let mut state = self.node.state.lock();
        if state.operation_state() == OperationState::Frozen {
            return Err(self.node.invalid_state("set_max_rate", OperationState::Frozen));
        }
        state.quantities[self.index].max_rate = max_rate;
        Ok(())
    }

    pub fn max_rate(&self) -> f64 {
        self.read(|q| q.max_rate)
    }

    pub fn mode(&self) -> ThrottleMode {
        self.read(|q| q.mode)
    }

    pub fn rate_units(&self) -> f64 {
        self.read(|q| q.rate_units)
    }

    pub fn time_units(&self) -> Duration {
        self.read(|q| q.time_units)
    }

    pub fn units_name(&self) -> String {
        self.read(|q| q.units_name.clone())
    }

    pub fn speed_units_name(&self) -> String {
        self.read(|q| q.speed_units_name.clone())
    }

    /// Increment pending in the current lapse (or the last one, once stopped)
    pub fn last_increment(&self) -> f64 {
        self.read(|q| q.last_increment)
    }
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quantity")
            .field("throttler", &self.node.name)
            .field("name", &self.name)
            .finish()
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) && self.index == other.index
    }
}
