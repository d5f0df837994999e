//! CLI configuration and argument parsing
//!
//! Settings come from three layers:
//! - Command-line arguments
//! - Environment variables (with PACEMETER_ prefix)
//! - A TOML file describing the throttler tree (`--tree`)
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! The tree file is not layered: it describes nodes and quantities, which
//! have no flag equivalent. `copy --rate` is the one flag that overrides a
//! value read from it.
//!
//! # Example Usage
//!
//! ```bash
//! # Copy a file at 1 MiB/s
//! pacectl copy --input big.iso --output /dev/null --rate 1048576
//!
//! # Same, through a node of a tree file
//! export PACEMETER_TREE=limits.toml
//! pacectl copy --input big.iso --output /dev/null --node root/disk
//!
//! # Drive every limited node of the tree with synthetic load
//! pacectl --tree limits.toml simulate --operations 500 --workers 4
//! ```

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use pacemeter::{DUTY_CYCLE_QUANTITY, ThrottleMode};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Validated configuration for one invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Throttler tree loaded from `--tree`
    pub tree: Option<TreeConfig>,
    /// Subcommand to run
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Copy(CopyConfig),
    Simulate(SimulateConfig),
}

/// Settings of the `copy` subcommand
#[derive(Debug, Clone)]
pub struct CopyConfig {
    /// Source file, stdin when absent
    pub input: Option<PathBuf>,
    /// Destination file, stdout when absent
    pub output: Option<PathBuf>,
    /// Byte rate limit; overrides the tree's value when both are set
    pub rate: Option<f64>,
    pub mode: ThrottleMode,
    /// Size of each read from the input
    pub chunk: usize,
    /// Slash-separated path of the tree node to throttle through
    pub node: Option<String>,
    /// Quantity on that node counting the copied bytes
    pub quantity: String,
}

/// Settings of the `simulate` subcommand
#[derive(Debug, Clone)]
pub struct SimulateConfig {
    /// Operations run by each worker
    pub operations: usize,
    /// Worker threads per limited node
    pub workers: usize,
    /// Mean increment applied to every quantity per operation
    pub increment: f64,
    /// Mean time spent inside each operation bracket
    pub work: Duration,
    /// Seed for the jitter generator; random when absent
    pub seed: Option<u64>,
    pub format: ReportFormat,
}

/// Output format of the simulation summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
    Prometheus,
}

impl std::str::FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "prometheus" => Ok(ReportFormat::Prometheus),
            _ => Err(anyhow!(
                "Invalid report format: {}. Valid options are: text, json, prometheus",
                s
            )),
        }
    }
}

/// Throttler tree as described by a TOML file
///
/// The top-level table is the root node; `instant_damping` and
/// `minimum_wait_us` tune the whole tree.
///
/// ```toml
/// name = "root"
/// instant_damping = 1.0
///
/// [[quantities]]
/// name = "bytes"
/// max_rate = 1048576
/// mode = "average"
/// units = "B"
/// speed_units = "B/s"
///
/// [[children]]
/// name = "disk"
/// duty_cycle = 0.5
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TreeConfig {
    /// Multiplier applied to instant-check waits in `both` mode
    #[serde(default)]
    pub instant_damping: Option<f64>,
    /// Waits at or below this many microseconds are skipped
    #[serde(default)]
    pub minimum_wait_us: Option<u64>,
    #[serde(default = "default_root_name")]
    pub name: String,
    #[serde(default)]
    pub duty_cycle: Option<f64>,
    #[serde(default)]
    pub quantities: Vec<QuantityConfig>,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// A non-root node of the tree
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default)]
    pub duty_cycle: Option<f64>,
    #[serde(default)]
    pub quantities: Vec<QuantityConfig>,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// A throttled quantity and its units
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QuantityConfig {
    pub name: String,
    /// Zero leaves the quantity unlimited
    #[serde(default)]
    pub max_rate: f64,
    /// One of `instant`, `average`, `both`
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub units: String,
    #[serde(default)]
    pub speed_units: String,
    #[serde(default = "default_rate_units")]
    pub rate_units: f64,
    #[serde(default = "default_time_units_ms")]
    pub time_units_ms: u64,
}

fn default_root_name() -> String {
    "root".to_string()
}

fn default_mode() -> String {
    "average".to_string()
}

fn default_rate_units() -> f64 {
    1.0
}

fn default_time_units_ms() -> u64 {
    1000
}

impl QuantityConfig {
    /// Parsed throttling mode
    pub fn throttle_mode(&self) -> Result<ThrottleMode> {
        self.mode
            .parse::<ThrottleMode>()
            .map_err(|e| anyhow!("quantity '{}': {}", self.name, e))
    }

    pub fn time_units(&self) -> Duration {
        Duration::from_millis(self.time_units_ms)
    }
}

/// Borrowed view shared by the root table and child nodes
pub struct NodeView<'a> {
    pub name: &'a str,
    pub duty_cycle: Option<f64>,
    pub quantities: &'a [QuantityConfig],
    pub children: &'a [NodeConfig],
}

impl TreeConfig {
    /// Loads and validates a tree file
    pub fn from_file(path: &Path) -> Result<Self> {
        let tree: TreeConfig = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("failed to load throttler tree from {}", path.display()))?;
        tree.validate()?;
        Ok(tree)
    }

    /// Parses and validates a tree from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let tree: TreeConfig = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .context("failed to parse throttler tree")?;
        tree.validate()?;
        Ok(tree)
    }

    pub fn root(&self) -> NodeView<'_> {
        NodeView {
            name: &self.name,
            duty_cycle: self.duty_cycle,
            quantities: &self.quantities,
            children: &self.children,
        }
    }

    pub fn minimum_wait(&self) -> Option<Duration> {
        self.minimum_wait_us.map(Duration::from_micros)
    }

    /// Checks every node and quantity of the tree
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending node path if:
    /// - A node name is empty or contains '/'
    /// - Sibling nodes share a name
    /// - Quantity names repeat on a node or shadow the duty-cycle quantity
    /// - A rate, unit scale or mode is invalid
    pub fn validate(&self) -> Result<()> {
        if let Some(damping) = self
            .instant_damping
            .filter(|d| !(d.is_finite() && *d >= 0.0))
        {
            return Err(anyhow!(
                "instant_damping must be a non-negative number, got {}",
                damping
            ));
        }
        validate_node(&self.root(), "")
    }
}

impl NodeConfig {
    pub fn view(&self) -> NodeView<'_> {
        NodeView {
            name: &self.name,
            duty_cycle: self.duty_cycle,
            quantities: &self.quantities,
            children: &self.children,
        }
    }
}

fn validate_node(node: &NodeView<'_>, parent_path: &str) -> Result<()> {
    if node.name.is_empty() || node.name.contains('/') {
        return Err(anyhow!(
            "invalid node name '{}' under '{}': names must be non-empty and must not contain '/'",
            node.name,
            parent_path
        ));
    }
    let path = if parent_path.is_empty() {
        node.name.to_string()
    } else {
        format!("{}/{}", parent_path, node.name)
    };

    if let Some(rate) = node.duty_cycle.filter(|r| !(0.0..=1.0).contains(r)) {
        return Err(anyhow!(
            "node '{}': duty_cycle must be within [0, 1], got {}",
            path,
            rate
        ));
    }

    let mut quantity_names = HashSet::new();
    for quantity in node.quantities {
        if quantity.name == DUTY_CYCLE_QUANTITY {
            return Err(anyhow!(
                "node '{}': quantity name '{}' is reserved, use duty_cycle instead",
                path,
                DUTY_CYCLE_QUANTITY
            ));
        }
        if !quantity_names.insert(quantity.name.as_str()) {
            return Err(anyhow!(
                "node '{}': quantity '{}' is defined twice",
                path,
                quantity.name
            ));
        }
        if !(quantity.max_rate.is_finite() && quantity.max_rate >= 0.0) {
            return Err(anyhow!(
                "node '{}': quantity '{}' max_rate must be a non-negative number, got {}",
                path,
                quantity.name,
                quantity.max_rate
            ));
        }
        if !(quantity.rate_units.is_finite() && quantity.rate_units > 0.0) {
            return Err(anyhow!(
                "node '{}': quantity '{}' rate_units must be positive, got {}",
                path,
                quantity.name,
                quantity.rate_units
            ));
        }
        if quantity.time_units_ms == 0 {
            return Err(anyhow!(
                "node '{}': quantity '{}' time_units_ms must be positive",
                path,
                quantity.name
            ));
        }
        quantity.throttle_mode().map_err(|e| anyhow!("node '{}': {}", path, e))?;
    }

    let mut child_names = HashSet::new();
    for child in node.children {
        if !child_names.insert(child.name.as_str()) {
            return Err(anyhow!(
                "node '{}': child '{}' is defined twice",
                path,
                child.name
            ));
        }
        validate_node(&child.view(), &path)?;
    }
    Ok(())
}

/// Command-line arguments
///
/// All global arguments can also be set via environment variables with the
/// PACEMETER_ prefix. CLI arguments take precedence over environment variables.
///
/// # Examples
///
/// Unlimited copy from stdin to stdout, reporting throughput:
/// ```bash
/// pacectl copy < input.bin > output.bin
/// ```
///
/// Simulation with debug logging and a JSON summary:
/// ```bash
/// pacectl --tree limits.toml --log-level debug simulate --format json
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "pacectl",
    about = "Throttle copies and simulate load through pacemeter throttler trees",
    long_about = "Drives pacemeter throttlers from the command line.\n\nA subcommand is required unless --list-env-vars is given.\n\nEnvironment variables with PACEMETER_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "TOML file describing the throttler tree",
        env = "PACEMETER_TREE"
    )]
    pub tree: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "PACEMETER_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy input to output through a throttled reader
    Copy(CopyArgs),
    /// Run synthetic operations on every limited node of the tree
    Simulate(SimulateArgs),
}

#[derive(clap::Args, Debug)]
pub struct CopyArgs {
    #[arg(long, short, value_name = "PATH", help = "Input file (default: stdin)")]
    pub input: Option<PathBuf>,
    #[arg(long, short, value_name = "PATH", help = "Output file (default: stdout)")]
    pub output: Option<PathBuf>,
    #[arg(
        long,
        value_name = "BYTES_PER_SEC",
        help = "Maximum byte rate, 0 for unlimited",
        env = "PACEMETER_RATE"
    )]
    pub rate: Option<f64>,
    #[arg(
        long,
        value_name = "MODE",
        help = "Throttling mode: instant, average, both",
        default_value = "average",
        env = "PACEMETER_MODE"
    )]
    pub mode: ThrottleMode,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Read chunk size in bytes",
        default_value_t = 64 * 1024,
        env = "PACEMETER_CHUNK"
    )]
    pub chunk: usize,
    #[arg(
        long,
        value_name = "PATH",
        help = "Tree node to throttle through, e.g. root/disk (requires --tree)"
    )]
    pub node: Option<String>,
    #[arg(
        long,
        value_name = "NAME",
        help = "Quantity counting the copied bytes",
        default_value = "bytes"
    )]
    pub quantity: String,
}

#[derive(clap::Args, Debug)]
pub struct SimulateArgs {
    #[arg(
        long,
        value_name = "N",
        help = "Operations per worker",
        default_value_t = 100,
        env = "PACEMETER_OPERATIONS"
    )]
    pub operations: usize,
    #[arg(
        long,
        value_name = "N",
        help = "Worker threads per limited node",
        default_value_t = 1,
        env = "PACEMETER_WORKERS"
    )]
    pub workers: usize,
    #[arg(
        long,
        value_name = "AMOUNT",
        help = "Mean increment per quantity and operation",
        default_value_t = 1.0
    )]
    pub increment: f64,
    #[arg(
        long,
        value_name = "MS",
        help = "Mean time spent inside each operation (milliseconds)",
        default_value_t = 1
    )]
    pub work_ms: u64,
    #[arg(long, value_name = "SEED", help = "Seed for the load jitter")]
    pub seed: Option<u64>,
    #[arg(
        long,
        value_name = "FORMAT",
        help = "Summary format: text, json, prometheus",
        default_value = "text"
    )]
    pub format: ReportFormat,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No subcommand is given
    /// - The tree file cannot be loaded or is invalid
    /// - Invalid configuration values are provided
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Builds and validates a configuration from parsed arguments
    pub fn from_args(args: Args) -> Result<Self> {
        let tree = args
            .tree
            .as_deref()
            .map(TreeConfig::from_file)
            .transpose()?;

        let command = match args.command {
            Some(Commands::Copy(copy)) => Command::Copy(CopyConfig {
                input: copy.input,
                output: copy.output,
                rate: copy.rate,
                mode: copy.mode,
                chunk: copy.chunk,
                node: copy.node,
                quantity: copy.quantity,
            }),
            Some(Commands::Simulate(simulate)) => Command::Simulate(SimulateConfig {
                operations: simulate.operations,
                workers: simulate.workers,
                increment: simulate.increment,
                work: Duration::from_millis(simulate.work_ms),
                seed: simulate.seed,
                format: simulate.format,
            }),
            None => {
                return Err(anyhow!(
                    "No subcommand given. Use 'copy' or 'simulate' (see --help)"
                ));
            }
        };

        let config = Config {
            log_level: args.log_level,
            tree,
            command,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match &self.command {
            Command::Copy(copy) => {
                if copy.chunk == 0 {
                    return Err(anyhow!("Chunk size must be at least one byte"));
                }
                if let Some(rate) = copy.rate.filter(|r| !(r.is_finite() && *r >= 0.0)) {
                    return Err(anyhow!("Rate must be a non-negative number, got {}", rate));
                }
                if copy.node.is_some() && self.tree.is_none() {
                    return Err(anyhow!(
                        "--node selects a node of the tree file. Use --tree to provide one"
                    ));
                }
            }
            Command::Simulate(simulate) => {
                if self.tree.is_none() {
                    return Err(anyhow!(
                        "simulate needs a throttler tree. Use --tree or PACEMETER_TREE"
                    ));
                }
                if simulate.workers == 0 {
                    return Err(anyhow!("At least one worker is required"));
                }
                if !(simulate.increment.is_finite() && simulate.increment >= 0.0) {
                    return Err(anyhow!(
                        "Increment must be a non-negative number, got {}",
                        simulate.increment
                    ));
                }
            }
        }
        Ok(())
    }

    /// Print all available environment variables
    pub fn print_env_vars() {
        println!("PaceMeter Environment Variables");
        println!("===============================");
        println!();
        println!("All CLI arguments can be set via environment variables.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("General:");
        println!("  PACEMETER_TREE=<path>        TOML file describing the throttler tree");
        println!("  PACEMETER_LOG_LEVEL=<level>  Log level: error, warn, info, debug, trace (default: info)");
        println!();

        println!("Copy:");
        println!("  PACEMETER_RATE=<bytes/s>     Maximum byte rate, 0 for unlimited");
        println!("  PACEMETER_MODE=<mode>        Throttling mode: instant, average, both (default: average)");
        println!("  PACEMETER_CHUNK=<size>       Read chunk size in bytes (default: 65536)");
        println!();

        println!("Simulate:");
        println!("  PACEMETER_OPERATIONS=<n>     Operations per worker (default: 100)");
        println!("  PACEMETER_WORKERS=<n>        Worker threads per limited node (default: 1)");
        println!();

        println!("Examples:");
        println!("  export PACEMETER_TREE=limits.toml");
        println!("  export PACEMETER_LOG_LEVEL=debug");
        println!("  pacectl simulate --operations 500");
    }
}
