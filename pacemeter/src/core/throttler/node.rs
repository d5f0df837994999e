//! Shared state behind a [`Throttler`](super::Throttler) handle
//!
//! A node owns two locks with different lifetimes:
//! - `state` guards the measurements and is only held for short critical
//!   sections, never across a wait or a callback.
//! - `operation` is the bracket lock: taken by `start_operation`, given back by
//!   `stop_operation`, possibly from a different call stack. It is a
//!   holder slot plus a condition variable so it can outlive any guard.

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

use crate::core::clock::Clock;
use crate::core::pause::PauseReason;
use crate::core::quantity::{QuantityState, ThrottleMode};
use crate::core::{OperationState, Result, ThrottleError};

use super::UpdateCallback;

/// Settings shared by every node of one tree
pub(crate) struct Settings {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) instant_damping: f64,
    pub(crate) minimum_wait: Duration,
    /// Serializes the actual sleeps of the whole tree
    pub(crate) sleep_lock: Mutex<()>,
}

/// Position of a node in its tree
pub(crate) enum Role {
    Root,
    /// Nearest ancestor first, root last
    Inner { ancestors: Vec<Weak<Node>> },
}

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) settings: Arc<Settings>,
    pub(crate) state: Mutex<NodeState>,
    pub(crate) callback: RwLock<Option<UpdateCallback>>,
    operation: Mutex<Option<ThreadId>>,
    operation_released: Condvar,
}

pub(crate) struct NodeState {
    pub(crate) first_started: Instant,
    pub(crate) currently_started: Option<Instant>,
    pub(crate) last_throttling: Option<Instant>,
    pub(crate) frozen_at: Option<Instant>,
    pub(crate) quantities: Vec<QuantityState>,
    pub(crate) by_name: HashMap<String, usize>,
    pub(crate) total_wait: Duration,
    pub(crate) last_lapse: Duration,
    pub(crate) duty_cycle: Option<usize>,
}

/// Winning wait of one closed lapse
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub(crate) index: Option<usize>,
    pub(crate) amount: Duration,
    pub(crate) reason: PauseReason,
    pub(crate) actual_rate: f64,
}

impl Node {
    pub(crate) fn new(name: String, role: Role, settings: Arc<Settings>) -> Self {
        let first_started = settings.clock.now();
        Node {
            name,
            role,
            settings,
            state: Mutex::new(NodeState {
                first_started,
                currently_started: None,
                last_throttling: None,
                frozen_at: None,
                quantities: Vec::new(),
                by_name: HashMap::new(),
                total_wait: Duration::ZERO,
                last_lapse: Duration::ZERO,
                duty_cycle: None,
            }),
            callback: RwLock::new(None),
            operation: Mutex::new(None),
            operation_released: Condvar::new(),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.settings.clock.now()
    }

    /// This node followed by every ancestor that is still alive
    ///
    /// Dropped intermediate nodes are skipped; the walk always reaches the
    /// root if it is alive.
    pub(crate) fn lineage(self: &Arc<Self>) -> Vec<Arc<Node>> {
        let mut lineage = vec![Arc::clone(self)];
        if let Role::Inner { ancestors } = &self.role {
            lineage.extend(ancestors.iter().filter_map(Weak::upgrade));
        }
        lineage
    }

    /// Blocks until the calling thread owns the operation bracket
    pub(crate) fn lock_operation(&self) {
        let me = thread::current().id();
        let mut holder = self.operation.lock();
        while holder.is_some() {
            self.operation_released.wait(&mut holder);
        }
        *holder = Some(me);
    }

    pub(crate) fn unlock_operation(&self) {
        let mut holder = self.operation.lock();
        *holder = None;
        self.operation_released.notify_one();
    }

    pub(crate) fn holds_operation(&self) -> bool {
        *self.operation.lock() == Some(thread::current().id())
    }

    /// Sleeps on behalf of this node and books the wait on the whole lineage
    pub(crate) fn pause(self: &Arc<Self>, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let lineage = self.lineage();
        {
            let _serial = self.settings.sleep_lock.lock();
            let sleeper = lineage.last().map_or(self.name.as_str(), |n| n.name.as_str());
            debug!(throttler = %self.name, root = %sleeper, amount = ?duration, "pausing");
            self.settings.clock.sleep(duration);
        }
        for node in &lineage {
            node.state.lock().total_wait += duration;
        }
    }

    pub(crate) fn invalid_state(&self, op: &'static str, state: OperationState) -> ThrottleError {
        ThrottleError::InvalidState {
            op,
            throttler: self.name.clone(),
            state,
        }
    }
}

impl NodeState {
    pub(crate) fn in_progress(&self) -> bool {
        self.currently_started.is_some()
    }

    pub(crate) fn operation_state(&self) -> OperationState {
        if self.frozen_at.is_some() {
            OperationState::Frozen
        } else if self.in_progress() {
            OperationState::Started
        } else {
            OperationState::Stopped
        }
    }

    /// Fails unless stopped and not frozen
    pub(crate) fn ensure_stopped(&self, node: &Node, op: &'static str) -> Result<()> {
        match self.operation_state() {
            OperationState::Stopped => Ok(()),
            state => Err(node.invalid_state(op, state)),
        }
    }

    pub(crate) fn ensure_started(&self, node: &Node, op: &'static str) -> Result<()> {
        match self.operation_state() {
            OperationState::Started => Ok(()),
            state => Err(node.invalid_state(op, state)),
        }
    }

    pub(crate) fn elapsed(&self, now: Instant) -> Duration {
        self.frozen_at
            .unwrap_or(now)
            .saturating_duration_since(self.first_started)
    }

    pub(crate) fn busy_time(&self, now: Instant) -> Duration {
        self.elapsed(now).saturating_sub(self.total_wait)
    }

    /// Computes the pause for the lapse ending at `now` and folds every
    /// pending increment into its quantity's total.
    pub(crate) fn close_lapse(&mut self, now: Instant, settings: &Settings, throttler: &str) -> Candidate {
        let started = self.currently_started.unwrap_or(now);
        self.last_lapse = now.saturating_duration_since(started);
        let since_throttle = now.saturating_duration_since(self.last_throttling.unwrap_or(started));
        let total_lapse = now.saturating_duration_since(self.first_started);

        if let Some(index) = self.duty_cycle {
            let busy = total_lapse.saturating_sub(self.total_wait);
            let duty = &mut self.quantities[index];
            duty.current_value = busy.as_secs_f64();
            duty.last_increment = 0.0;
        }

        let mut best = Candidate::none();
        for (index, qty) in self.quantities.iter().enumerate() {
            let accumulated = qty.current_value + qty.last_increment;
            match qty.mode {
                ThrottleMode::Average => {
                    best.consider(index, qty, accumulated, total_lapse, PauseReason::Average, settings)
                }
                ThrottleMode::Instant => best.consider(
                    index,
                    qty,
                    qty.last_increment,
                    since_throttle,
                    PauseReason::Instant,
                    settings,
                ),
                ThrottleMode::Both => {
                    best.consider(
                        index,
                        qty,
                        qty.last_increment,
                        since_throttle,
                        PauseReason::Instant,
                        settings,
                    );
                    best.consider(index, qty, accumulated, total_lapse, PauseReason::Average, settings);
                }
            }
        }

        for qty in &mut self.quantities {
            qty.current_value += qty.last_increment;
        }

        if let Some(index) = best.index {
            let qty = &self.quantities[index];
            debug!(
                throttler = %throttler,
                quantity = %qty.name,
                amount = ?best.amount,
                reason = ?best.reason,
                rate = best.actual_rate,
                max_rate = qty.max_rate,
                units = %qty.speed_units_name,
                "throttling"
            );
        }
        best
    }
}

impl Candidate {
    pub(crate) fn none() -> Self {
        Candidate {
            index: None,
            amount: Duration::ZERO,
            reason: PauseReason::Average,
            actual_rate: 0.0,
        }
    }

    fn consider(
        &mut self,
        index: usize,
        qty: &QuantityState,
        measured: f64,
        interval: Duration,
        reason: PauseReason,
        settings: &Settings,
    ) {
        if qty.max_rate <= 0.0 || interval.is_zero() {
            return;
        }
        let current_rate = measured * qty.time_units.as_secs_f64() / interval.as_secs_f64();
        let mut wait = Duration::ZERO;
        if current_rate > qty.max_rate {
            let mut secs = interval.as_secs_f64() * (current_rate / qty.max_rate - 1.0);
            if reason == PauseReason::Instant && qty.mode == ThrottleMode::Both {
                secs *= settings.instant_damping;
            }
            wait = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
            if wait > settings.minimum_wait && wait > self.amount {
                self.index = Some(index);
                self.amount = wait;
                self.reason = reason;
                self.actual_rate = current_rate;
            }
        }
        trace!(
            quantity = %qty.name,
            check = ?reason,
            value = measured,
            rate_units = qty.rate_units,
            time_units = ?qty.time_units,
            lapse = ?interval,
            rate = current_rate,
            max_rate = qty.max_rate,
            units = %qty.units_name,
            wait = ?wait,
            "rate check"
        );
    }
}
