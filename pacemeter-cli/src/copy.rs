//! Throttled copy from an input stream to an output stream

use anyhow::{Context, Result, anyhow};
use pacemeter::io::ThrottledReader;
use pacemeter::{ApproxDuration, Clock, Quantity, ThrottleMode, Throttler};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CopyConfig, TreeConfig};
use crate::tree::ThrottlerTree;

const DEFAULT_ROOT: &str = "pacemeter";
const DEFAULT_NODE: &str = "copy";

/// The node and byte quantity a copy is throttled through
pub struct CopyTarget {
    // Owns the root; waits are booked on every live ancestor
    tree: ThrottlerTree,
    path: String,
    quantity: Quantity,
}

impl CopyTarget {
    /// Resolves the target from the tree file, or builds a one-node tree
    /// limited by `--rate` when there is none
    pub fn resolve(
        config: &CopyConfig,
        tree_config: Option<&TreeConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        match tree_config {
            Some(tree_config) => {
                let tree = ThrottlerTree::build(tree_config, clock)?;
                let path = config
                    .node
                    .clone()
                    .unwrap_or_else(|| tree.root().name().to_string());
                let node = tree.require(&path)?;
                let quantity = node.quantity(&config.quantity).ok_or_else(|| {
                    anyhow!(
                        "node '{}' has no quantity '{}'. Defined: {}",
                        path,
                        config.quantity,
                        node.quantity_names().join(", ")
                    )
                })?;
                if let Some(rate) = config.rate {
                    quantity.set_max_rate(rate)?;
                }
                Ok(CopyTarget {
                    tree,
                    path,
                    quantity,
                })
            }
            None => {
                let root = Throttler::builder()
                    .name(DEFAULT_ROOT)
                    .clock(clock)
                    .build()?;
                let node = root.child(DEFAULT_NODE);
                let quantity = node.define_throttled_quantity(
                    &config.quantity,
                    config.rate.unwrap_or(0.0),
                    config.mode,
                )?;
                quantity.set_units("B", "B/s", 1.0, Duration::from_secs(1))?;
                Ok(CopyTarget {
                    tree: ThrottlerTree::from_nodes(vec![
                        (DEFAULT_ROOT.to_string(), root),
                        (format!("{DEFAULT_ROOT}/{DEFAULT_NODE}"), node),
                    ]),
                    path: format!("{DEFAULT_ROOT}/{DEFAULT_NODE}"),
                    quantity,
                })
            }
        }
    }

    pub fn quantity(&self) -> &Quantity {
        &self.quantity
    }

    pub fn tree(&self) -> &ThrottlerTree {
        &self.tree
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Outcome of a finished copy
#[derive(Debug, Clone, Serialize)]
pub struct CopySummary {
    pub bytes: u64,
    pub elapsed_secs: f64,
    pub total_wait_secs: f64,
    /// Bytes per second over the whole copy
    pub throughput: f64,
}

impl fmt::Display for CopySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = Duration::from_millis(1);
        write!(
            f,
            "copied {} bytes in {:?}, waited {:?}, {:.1} B/s",
            self.bytes,
            Duration::from_secs_f64(self.elapsed_secs).in_auto_units(precision),
            Duration::from_secs_f64(self.total_wait_secs).in_auto_units(precision),
            self.throughput
        )
    }
}

/// Copies `input` to `output` in `chunk`-sized reads through the target's
/// byte quantity
pub fn copy_through<R: Read, W: Write>(
    target: &CopyTarget,
    input: R,
    mut output: W,
    chunk: usize,
) -> Result<CopySummary> {
    let node = target.quantity.throttler();
    let started = node.clock().now();
    let waited_before = node.total_wait_time();

    let mut reader = ThrottledReader::new(input, target.quantity.clone());
    let mut buf = vec![0u8; chunk];
    let mut bytes = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("read failed"),
        };
        output.write_all(&buf[..n]).context("write failed")?;
        bytes += n as u64;
    }
    output.flush().context("flush failed")?;

    let elapsed = node.clock().now().saturating_duration_since(started);
    let total_wait = node.total_wait_time().saturating_sub(waited_before);
    let throughput = if elapsed.is_zero() {
        0.0
    } else {
        bytes as f64 / elapsed.as_secs_f64()
    };
    Ok(CopySummary {
        bytes,
        elapsed_secs: elapsed.as_secs_f64(),
        total_wait_secs: total_wait.as_secs_f64(),
        throughput,
    })
}

/// Runs the `copy` subcommand on real files or the standard streams
pub fn run(config: &CopyConfig, tree_config: Option<&TreeConfig>) -> Result<CopySummary> {
    let target = CopyTarget::resolve(config, tree_config, Arc::new(pacemeter::SystemClock))?;
    let quantity = target.quantity();
    tracing::info!(
        "Copying through {}:{} (limit {}, mode {})",
        target.path(),
        quantity.name(),
        describe_limit(quantity),
        quantity.mode()
    );
    if tree_config.is_some() && config.mode != ThrottleMode::default() {
        tracing::warn!("--mode is ignored when the quantity comes from the tree file");
    }

    let input: Box<dyn Read> = match &config.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };
    let output: Box<dyn Write> = match &config.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let summary = copy_through(&target, input, output, config.chunk)?;
    tracing::info!("{}", summary);
    Ok(summary)
}

fn describe_limit(quantity: &Quantity) -> String {
    if quantity.max_rate() > 0.0 {
        format!("{} {}", quantity.max_rate(), quantity.speed_units_name())
    } else {
        "none".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacemeter::ManualClock;

    fn copy_config(rate: Option<f64>) -> CopyConfig {
        CopyConfig {
            input: None,
            output: None,
            rate,
            mode: ThrottleMode::Average,
            chunk: 1000,
            node: None,
            quantity: "bytes".to_string(),
        }
    }

    #[test]
    fn test_unlimited_copy() {
        let clock = Arc::new(ManualClock::new());
        let target = CopyTarget::resolve(&copy_config(None), None, clock).unwrap();
        assert_eq!(target.path(), "pacemeter/copy");

        let data: Vec<u8> = (0..=255).cycle().take(5000).collect();
        let mut out = Vec::new();
        let summary = copy_through(&target, &data[..], &mut out, 1000).unwrap();

        assert_eq!(out, data);
        assert_eq!(summary.bytes, 5000);
        assert_eq!(summary.total_wait_secs, 0.0);
        assert_eq!(target.quantity().value(), 5000.0);
    }

    #[test]
    fn test_rate_limited_copy() {
        let clock = Arc::new(ManualClock::new());
        let target = CopyTarget::resolve(&copy_config(Some(1000.0)), None, clock.clone()).unwrap();
        clock.advance(Duration::from_millis(1));

        let data = vec![9u8; 10_000];
        let mut out = Vec::new();
        let summary = copy_through(&target, &data[..], &mut out, 1000).unwrap();

        assert_eq!(out.len(), 10_000);
        // Waits are the only thing moving the clock
        assert!(summary.elapsed_secs >= 9.99, "{summary}");
        assert_eq!(summary.elapsed_secs, summary.total_wait_secs);
        assert!(target.quantity().average_rate() <= 1000.0 * (1.0 + 1e-5));
        assert_eq!(
            target.tree().root().total_wait_time(),
            target.quantity().throttler().total_wait_time()
        );
    }

    #[test]
    fn test_copy_through_tree_node() {
        let tree = TreeConfig::from_toml_str(
            "name = \"io\"\n[[children]]\nname = \"disk\"\n  [[children.quantities]]\n  name = \"payload\"\n  max_rate = 10",
        )
        .unwrap();
        let mut config = copy_config(Some(500.0));
        config.node = Some("disk".to_string());
        config.quantity = "payload".to_string();

        let target =
            CopyTarget::resolve(&config, Some(&tree), Arc::new(ManualClock::new())).unwrap();
        assert_eq!(target.path(), "disk");
        assert_eq!(target.quantity().max_rate(), 500.0);
        assert_eq!(target.quantity().throttler().name(), "disk");

        config.quantity = "bytes".to_string();
        let err = CopyTarget::resolve(&config, Some(&tree), Arc::new(ManualClock::new()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no quantity 'bytes'"), "{err}");
    }

    #[test]
    fn test_summary_display() {
        let summary = CopySummary {
            bytes: 2048,
            elapsed_secs: 2.0004,
            total_wait_secs: 1.5,
            throughput: 1023.8,
        };
        assert_eq!(
            summary.to_string(),
            "copied 2048 bytes in 2s, waited 1.5s, 1023.8 B/s"
        );
    }
}
