//! # pacemeter
//!
//! A hierarchical rate throttler for Rust.
//!
//! ## Overview
//!
//! pacemeter meters named quantities (bytes transferred, operations
//! performed, busy time) against configured maximum rates. When a measured
//! rate runs ahead of its maximum, the throttler computes the [`Pause`] that
//! brings it back within bound and the caller's thread waits it out.
//!
//! - **Instant, average or both**: each quantity is limited on the rate of
//!   the last lapse, on the rate since creation, or on both
//! - **One wait for all limits**: a pause is the largest wait any quantity
//!   needs, never a sum
//! - **Trees**: children measure their own quantities; the whole tree's
//!   waits are executed back-to-back and booked on every ancestor
//! - **Duty cycle**: cap the fraction of time a throttler spends working
//! - **Observers**: a callback sees every pause of its throttler's subtree
//!
//! ## Quick Start
//!
//! ```
//! use pacemeter::{ThrottleMode, Throttler};
//!
//! let root = Throttler::root("service");
//! let requests = root.child("requests");
//! let calls = requests
//!     .define_throttled_quantity("calls", 1_000.0, ThrottleMode::Both)
//!     .unwrap();
//!
//! for _ in 0..3 {
//!     requests.start_operation().unwrap();
//!     calls.update(1.0).unwrap();
//!     let mut pause = requests.stop_operation().unwrap();
//!     if pause.is_needed() {
//!         println!("{pause}");
//!     }
//!     pause.wait();
//! }
//! ```
//!
//! ## Throttling a reader
//!
//! ```
//! use pacemeter::io::ThrottledReader;
//! use pacemeter::{ThrottleMode, Throttler};
//! use std::io::Read;
//!
//! let root = Throttler::root("io");
//! let bytes = root
//!     .define_throttled_quantity("bytes", 10_000_000.0, ThrottleMode::Average)
//!     .unwrap();
//!
//! let mut reader = ThrottledReader::new(&b"hello world"[..], bytes);
//! let mut out = String::new();
//! reader.read_to_string(&mut out).unwrap();
//! assert_eq!(out, "hello world");
//! ```
//!
//! ## Thread Safety
//!
//! [`Throttler`] handles are `Send + Sync` and cheap to clone. Operation
//! brackets are exclusive: a thread calling
//! [`start_operation`](Throttler::start_operation) while another thread holds
//! the bracket blocks until that thread calls
//! [`stop_operation`](Throttler::stop_operation).
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for the quantity index

pub mod core;
pub mod io;

pub use core::{
    ApproxDuration, Clock, DUTY_CYCLE_QUANTITY, ErrorKind, ManualClock, OperationState, Pause,
    PauseReason, Quantity, Result, SystemClock, ThrottleError, ThrottleMode, Throttler,
    ThrottlerBuilder, UpdateCallback,
};
