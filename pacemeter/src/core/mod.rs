//! Core components of the pacemeter throttling engine
//!
//! This module contains the fundamental building blocks:
//! - [`quantity`]: Metered values, their rate limits and unit scaling
//! - [`pause`]: The wait a completed lapse must honor
//! - [`throttler`]: Operation lifecycle, pause computation and the throttler tree
//! - [`clock`]: Time source and blocking wait used by a throttler tree
//! - [`approx`]: Truncating durations for display

pub mod approx;
pub mod clock;
pub mod pause;
pub mod quantity;
pub mod throttler;
#[cfg(test)]
mod tests;

pub use approx::ApproxDuration;
pub use clock::{Clock, ManualClock, SystemClock};
pub use pause::{Pause, PauseReason};
pub use quantity::{Quantity, ThrottleMode};
pub use throttler::{DUTY_CYCLE_QUANTITY, Throttler, ThrottlerBuilder, UpdateCallback};

use std::fmt;

/// Broad classification of a [`ThrottleError`]
///
/// Every error the engine returns is a broken caller contract; normal
/// throttling never fails, it only waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The throttler was not in a state that allows the operation
    InvalidState,
    /// A quantity with the same name is already defined on the throttler
    DuplicateQuantity,
    /// No quantity with the given name is defined on the throttler
    UnknownQuantity,
    /// A numeric argument is outside its accepted range
    OutOfRange,
}

/// Lifecycle state of a throttler, as reported in [`ThrottleError::InvalidState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// No operation bracket is open
    Stopped,
    /// An operation bracket is open
    Started,
    /// The throttler has been frozen and accepts no further operations
    Frozen,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Stopped => write!(f, "stopped"),
            OperationState::Started => write!(f, "started"),
            OperationState::Frozen => write!(f, "frozen"),
        }
    }
}

/// Errors returned when a caller breaks the throttler contract
///
/// # Example
///
/// ```
/// use pacemeter::{ErrorKind, ThrottleMode, Throttler};
///
/// let root = Throttler::root("io");
/// root.define_throttled_quantity("bytes", 1024.0, ThrottleMode::Average).unwrap();
///
/// let err = root
///     .define_throttled_quantity("bytes", 2048.0, ThrottleMode::Average)
///     .unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::DuplicateQuantity);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    #[error("{op}() called on {state} throttler '{throttler}'")]
    InvalidState {
        op: &'static str,
        throttler: String,
        state: OperationState,
    },

    #[error("quantity '{0}' is already defined")]
    DuplicateQuantity(String),

    #[error("quantity '{0}' is not defined")]
    UnknownQuantity(String),

    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: f64 },
}

impl ThrottleError {
    /// Returns the broad classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ThrottleError::InvalidState { .. } => ErrorKind::InvalidState,
            ThrottleError::DuplicateQuantity(_) => ErrorKind::DuplicateQuantity,
            ThrottleError::UnknownQuantity(_) => ErrorKind::UnknownQuantity,
            ThrottleError::OutOfRange { .. } => ErrorKind::OutOfRange,
        }
    }
}

pub type Result<T> = std::result::Result<T, ThrottleError>;
