//! # pacectl
//!
//! Command-line driver for [`pacemeter`] throttler trees.
//!
//! ## Purpose
//!
//! pacemeter throttles work by measuring it: quantities are updated inside
//! operation brackets and the throttler tells the caller how long to wait.
//! `pacectl` puts that engine in front of two workloads:
//!
//! - **copy**: stream a file (or stdin) through a byte-rate limit
//! - **simulate**: run synthetic operations on every limited node of a
//!   throttler tree and report how the limits held
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! pacectl --help
//!
//! # Copy at 1 MiB/s
//! pacectl copy --input big.iso --output copy.iso --rate 1048576
//!
//! # Simulate a tree described in TOML, four workers per limited node
//! pacectl --tree limits.toml simulate --workers 4 --format json
//! ```
//!
//! ## Configuration
//!
//! Configure via CLI arguments or environment variables (CLI takes precedence):
//!
//! ```bash
//! export PACEMETER_TREE=limits.toml
//! export PACEMETER_LOG_LEVEL=debug
//! pacectl simulate --operations 500
//!
//! # List all available environment variables
//! pacectl --list-env-vars
//! ```
//!
//! The tree file describes the root, its children and their quantities:
//!
//! ```toml
//! name = "io"
//!
//! [[quantities]]
//! name = "bytes"
//! max_rate = 1048576
//! units = "B"
//! speed_units = "B/s"
//!
//! [[children]]
//! name = "disk"
//! duty_cycle = 0.5
//!
//!   [[children.quantities]]
//!   name = "ops"
//!   max_rate = 200
//!   mode = "both"
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────────┐
//! │  config  │──►│ ThrottlerTree │──►│ copy / simulate  │
//! │ clap+toml│   │ (tree::build) │   │  worker threads  │
//! └──────────┘   └───────┬───────┘   └────────┬─────────┘
//!                        │ root callback      │ pauses
//!                  ┌─────▼──────┐       ┌─────▼─────┐
//!                  │PauseMetrics│──────►│  report   │
//!                  └────────────┘       └───────────┘
//! ```

pub mod config;
pub mod copy;
pub mod metrics;
pub mod report;
pub mod simulate;
pub mod tree;
