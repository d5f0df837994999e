//! Throttlers and the throttler tree
//!
//! A [`Throttler`] meters the quantities defined on it over operation
//! brackets:
//!
//! ```text
//! start_operation ──► update … throttle … update ──► stop_operation ──► Pause
//! ```
//!
//! Throttlers form a tree. Every child measures its own quantities, but the
//! blocking wait is always executed once, by the tree's clock, serialized
//! across the whole tree, and booked as wait time on the child and on each
//! of its ancestors.

pub(crate) mod node;

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::pause::Pause;
use super::quantity::{Quantity, QuantityState, ThrottleMode, validate_max_rate};
use super::{OperationState, Result, ThrottleError};
use node::{Node, Role, Settings};

// Configuration constants
const DEFAULT_ROOT_NAME: &str = "root";
const DEFAULT_INSTANT_DAMPING: f64 = 1.0;
const DEFAULT_MINIMUM_WAIT: Duration = Duration::from_micros(1);

/// Name of the quantity [`Throttler::set_duty_cycle`] defines
pub const DUTY_CYCLE_QUANTITY: &str = "DutyCycle";

/// Observer invoked with every pause computed on a throttler or any of its
/// descendants
pub type UpdateCallback = Arc<dyn Fn(&Pause) + Send + Sync>;

/// Handle to a node of a throttler tree
///
/// Handles are cheap to clone; clones refer to the same node. A child only
/// holds weak references to its ancestors, so keep the root alive for as
/// long as its children are in use: waits are booked on ancestors that are
/// still alive.
///
/// # Example
///
/// ```
/// use pacemeter::{ManualClock, ThrottleMode, Throttler};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new());
/// let root = Throttler::builder().name("io").clock(clock.clone()).build().unwrap();
/// let disk = root.child("disk");
/// let bytes = disk
///     .define_throttled_quantity("bytes", 100.0, ThrottleMode::Average)
///     .unwrap();
///
/// disk.start_operation().unwrap();
/// bytes.update(250.0).unwrap();
/// clock.advance(Duration::from_secs(1));
/// let mut pause = disk.stop_operation().unwrap();
///
/// assert_eq!(pause.amount(), Duration::from_millis(1500));
/// pause.wait();
/// assert_eq!(root.total_wait_time(), Duration::from_millis(1500));
/// assert_eq!(disk.total_wait_time(), Duration::from_millis(1500));
/// ```
#[derive(Clone)]
pub struct Throttler {
    node: Arc<Node>,
}

/// Builder for configuring a root [`Throttler`]
///
/// The settings apply to the whole tree: children created from the root
/// share its clock, damping and minimum wait.
///
/// # Example
///
/// ```
/// use pacemeter::{SystemClock, Throttler};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let root = Throttler::builder()
///     .name("uploads")
///     .clock(Arc::new(SystemClock))
///     .instant_damping(0.5)
///     .minimum_wait(Duration::from_micros(50))
///     .build()
///     .unwrap();
/// assert!(root.is_root());
/// ```
pub struct ThrottlerBuilder {
    name: String,
    clock: Arc<dyn Clock>,
    instant_damping: f64,
    minimum_wait: Duration,
}

impl ThrottlerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Time source and sleeper used by every node of the tree
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Multiplier applied to instantaneous waits of [`ThrottleMode::Both`]
    /// quantities
    pub fn instant_damping(mut self, factor: f64) -> Self {
        self.instant_damping = factor;
        self
    }

    /// Waits not longer than this are dropped
    pub fn minimum_wait(mut self, minimum_wait: Duration) -> Self {
        self.minimum_wait = minimum_wait;
        self
    }

    pub fn build(self) -> Result<Throttler> {
        if !self.instant_damping.is_finite() || self.instant_damping < 0.0 {
            return Err(ThrottleError::OutOfRange {
                what: "instant damping",
                value: self.instant_damping,
            });
        }
        let settings = Settings {
            clock: self.clock,
            instant_damping: self.instant_damping,
            minimum_wait: self.minimum_wait,
            sleep_lock: Mutex::new(()),
        };
        Ok(Throttler::from_node(Arc::new(Node::new(
            self.name,
            Role::Root,
            Arc::new(settings),
        ))))
    }
}

impl Throttler {
    /// Creates a root throttler on the system clock with default settings
    pub fn root(name: impl Into<String>) -> Self {
        let settings = Settings {
            clock: Arc::new(SystemClock),
            instant_damping: DEFAULT_INSTANT_DAMPING,
            minimum_wait: DEFAULT_MINIMUM_WAIT,
            sleep_lock: Mutex::new(()),
        };
        Throttler::from_node(Arc::new(Node::new(name.into(), Role::Root, Arc::new(settings))))
    }

    pub fn builder() -> ThrottlerBuilder {
        ThrottlerBuilder {
            name: DEFAULT_ROOT_NAME.to_string(),
            clock: Arc::new(SystemClock),
            instant_damping: DEFAULT_INSTANT_DAMPING,
            minimum_wait: DEFAULT_MINIMUM_WAIT,
        }
    }

    pub(crate) fn from_node(node: Arc<Node>) -> Self {
        Throttler { node }
    }

    /// Creates a throttler nested under this one
    pub fn child(&self, name: impl Into<String>) -> Throttler {
        let mut ancestors = vec![Arc::downgrade(&self.node)];
        if let Role::Inner { ancestors: above } = &self.node.role {
            ancestors.extend(above.iter().cloned());
        }
        let node = Node::new(
            name.into(),
            Role::Inner { ancestors },
            Arc::clone(&self.node.settings),
        );
        Throttler::from_node(Arc::new(node))
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// The direct parent, if this is not a root and the parent is alive
    pub fn parent(&self) -> Option<Throttler> {
        match &self.node.role {
            Role::Root => None,
            Role::Inner { ancestors } => ancestors
                .first()
                .and_then(Weak::upgrade)
                .map(Throttler::from_node),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.node.role, Role::Root)
    }

    /// The clock shared by this throttler's tree
    pub fn clock(&self) -> &dyn Clock {
        self.node.settings.clock.as_ref()
    }

    /// Defines a metered quantity; `max_rate` of 0 means unlimited
    ///
    /// # Errors
    ///
    /// - [`ThrottleError::InvalidState`] if an operation is in progress or the
    ///   throttler is frozen
    /// - [`ThrottleError::DuplicateQuantity`] if the name is taken
    /// - [`ThrottleError::OutOfRange`] if `max_rate` is negative or not finite
    pub fn define_throttled_quantity(
        &self,
        name: &str,
        max_rate: f64,
        mode: ThrottleMode,
    ) -> Result<Quantity> {
        validate_max_rate(max_rate)?;
        let mut state = self.node.state.lock();
        state.ensure_stopped(&self.node, "define_throttled_quantity")?;
        if state.by_name.contains_key(name) {
            return Err(ThrottleError::DuplicateQuantity(name.to_string()));
        }
        let index = state.quantities.len();
        state
            .quantities
            .push(QuantityState::new(name.to_string(), max_rate, mode));
        state.by_name.insert(name.to_string(), index);
        Ok(Quantity::new(Arc::clone(&self.node), index, name))
    }

    pub fn quantity(&self, name: &str) -> Option<Quantity> {
        let state = self.node.state.lock();
        state
            .by_name
            .get(name)
            .map(|&index| Quantity::new(Arc::clone(&self.node), index, name))
    }

    fn require(&self, name: &str) -> Result<Quantity> {
        self.quantity(name)
            .ok_or_else(|| ThrottleError::UnknownQuantity(name.to_string()))
    }

    /// Names of the defined quantities, in definition order
    pub fn quantity_names(&self) -> Vec<String> {
        let state = self.node.state.lock();
        state.quantities.iter().map(|q| q.name.clone()).collect()
    }

    /// See [`Quantity::set_units`]
    pub fn set_units(
        &self,
        quantity: &str,
        units_name: &str,
        speed_units_name: &str,
        rate_units: f64,
        time_units: Duration,
    ) -> Result<()> {
        self.require(quantity)?
            .set_units(units_name, speed_units_name, rate_units, time_units)
    }

    /// See [`Quantity::update`]
    pub fn update(&self, quantity: &str, increment: f64) -> Result<()> {
        self.require(quantity)?.update(increment)
    }

    /// Opens an operation bracket
    ///
    /// Blocks while another thread holds this throttler's bracket.
    ///
    /// # Errors
    ///
    /// [`ThrottleError::InvalidState`] if the throttler is frozen or the
    /// calling thread already holds the bracket.
    pub fn start_operation(&self) -> Result<()> {
        if self.node.state.lock().frozen_at.is_some() {
            return Err(self
                .node
                .invalid_state("start_operation", OperationState::Frozen));
        }
        if self.node.holds_operation() {
            return Err(self
                .node
                .invalid_state("start_operation", OperationState::Started));
        }

        self.node.lock_operation();
        let now = self.node.now();
        let mut state = self.node.state.lock();
        if state.frozen_at.is_some() {
            drop(state);
            self.node.unlock_operation();
            return Err(self
                .node
                .invalid_state("start_operation", OperationState::Frozen));
        }
        state.currently_started = Some(now);
        state.last_throttling = Some(now);
        for qty in &mut state.quantities {
            qty.last_increment = 0.0;
        }
        Ok(())
    }

    /// Closes the operation bracket and returns the pause it requires
    ///
    /// The pause is not waited on; call [`Pause::wait`] to honor it.
    pub fn stop_operation(&self) -> Result<Pause> {
        let pause = {
            let now = self.node.now();
            let mut state = self.node.state.lock();
            state.ensure_started(&self.node, "stop_operation")?;
            let candidate = state.close_lapse(now, &self.node.settings, &self.node.name);
            state.currently_started = None;
            state.last_throttling = None;
            self.to_pause(candidate, &state.quantities)
        };
        self.node.unlock_operation();
        self.notify(&pause);
        Ok(pause)
    }

    /// Closes the current lapse and waits out its pause without leaving the
    /// operation
    pub fn throttle(&self) -> Result<()> {
        let mut pause = {
            let now = self.node.now();
            let mut state = self.node.state.lock();
            state.ensure_started(&self.node, "throttle")?;
            let candidate = state.close_lapse(now, &self.node.settings, &self.node.name);
            for qty in &mut state.quantities {
                qty.last_increment = 0.0;
            }
            self.to_pause(candidate, &state.quantities)
        };
        self.notify(&pause);
        pause.wait();
        let now = self.node.now();
        self.node.state.lock().last_throttling = Some(now);
        Ok(())
    }

    fn to_pause(&self, candidate: node::Candidate, quantities: &[QuantityState]) -> Pause {
        let quantity = candidate
            .index
            .map(|index| Quantity::new(Arc::clone(&self.node), index, &quantities[index].name));
        Pause::new(
            quantity,
            candidate.amount,
            candidate.reason,
            candidate.actual_rate,
        )
    }

    /// Invokes the update callback of this throttler and of every ancestor
    fn notify(&self, pause: &Pause) {
        for node in self.node.lineage() {
            let callback = node.callback.read().clone();
            if let Some(callback) = callback {
                callback(pause);
            }
        }
    }

    /// Whether any thread currently holds this throttler's bracket
    pub fn is_operation_in_progress(&self) -> bool {
        self.node.state.lock().in_progress()
    }

    /// Whether the calling thread holds this throttler's bracket
    pub fn holds_operation(&self) -> bool {
        self.node.holds_operation()
    }

    /// Permanently stops this throttler; elapsed time stops counting
    pub fn freeze(&self) -> Result<()> {
        let now = self.node.now();
        let mut state = self.node.state.lock();
        state.ensure_stopped(&self.node, "freeze")?;
        state.frozen_at = Some(now);
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.node.state.lock().frozen_at.is_some()
    }

    /// Time since creation, or until the freeze
    pub fn elapsed_time(&self) -> Duration {
        let now = self.node.now();
        self.node.state.lock().elapsed(now)
    }

    /// Total wait booked on this throttler, including waits of descendants
    pub fn total_wait_time(&self) -> Duration {
        self.node.state.lock().total_wait
    }

    /// Duration of the most recently closed lapse
    pub fn last_lapse(&self) -> Duration {
        self.node.state.lock().last_lapse
    }

    /// Limits the fraction of elapsed time not spent waiting to `rate`
    ///
    /// The first call defines a derived `DutyCycle` quantity; later calls only
    /// change its target.
    pub fn set_duty_cycle(&self, rate: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ThrottleError::OutOfRange {
                what: "duty cycle",
                value: rate,
            });
        }
        let mut state = self.node.state.lock();
        state.ensure_stopped(&self.node, "set_duty_cycle")?;
        match state.duty_cycle {
            Some(index) => state.quantities[index].max_rate = rate,
            None => {
                if state.by_name.contains_key(DUTY_CYCLE_QUANTITY) {
                    return Err(ThrottleError::DuplicateQuantity(
                        DUTY_CYCLE_QUANTITY.to_string(),
                    ));
                }
                let mut duty =
                    QuantityState::new(DUTY_CYCLE_QUANTITY.to_string(), rate, ThrottleMode::Average);
                duty.units_name = "duty".to_string();
                let index = state.quantities.len();
                state.quantities.push(duty);
                state.by_name.insert(DUTY_CYCLE_QUANTITY.to_string(), index);
                state.duty_cycle = Some(index);
            }
        }
        Ok(())
    }

    /// Fraction of elapsed time not spent waiting, in `[0, 1]`
    pub fn duty_cycle(&self) -> f64 {
        let now = self.node.now();
        let state = self.node.state.lock();
        let elapsed = state.elapsed(now);
        if elapsed.is_zero() {
            return 1.0;
        }
        (state.busy_time(now).as_secs_f64() / elapsed.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Installs the observer called with every pause computed here or below
    ///
    /// Callbacks run without any lock of the tree held. On the
    /// `stop_operation` path the bracket is already released, so a callback
    /// may start the next operation on the same throttler.
    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: Fn(&Pause) + Send + Sync + 'static,
    {
        *self.node.callback.write() = Some(Arc::new(callback));
    }

    pub fn clear_update_callback(&self) {
        *self.node.callback.write() = None;
    }

    /// Waits for `duration` on behalf of this throttler
    ///
    /// The sleep is serialized with every other wait of the tree and booked
    /// on this throttler and all of its ancestors.
    pub fn pause(&self, duration: Duration) {
        self.node.pause(duration);
    }
}

impl Default for Throttler {
    fn default() -> Self {
        Throttler::root(DEFAULT_ROOT_NAME)
    }
}

impl PartialEq for Throttler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl fmt::Debug for Throttler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttler")
            .field("name", &self.node.name)
            .field("root", &self.is_root())
            .finish()
    }
}
