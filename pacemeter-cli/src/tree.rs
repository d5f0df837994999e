//! Throttler trees built from configuration

use anyhow::{Context, Result, anyhow};
use pacemeter::{Clock, DUTY_CYCLE_QUANTITY, Quantity, Throttler};
use std::sync::Arc;

use crate::config::{NodeView, TreeConfig};

/// A built tree and its nodes addressed by slash-separated paths
///
/// Paths start with the root's name: `io`, `io/disk`, `io/disk/journal`.
/// Nodes are kept in depth-first order, parents before children.
pub struct ThrottlerTree {
    nodes: Vec<(String, Throttler)>,
}

impl ThrottlerTree {
    /// Creates the root with the tree's settings and every node below it
    pub fn build(config: &TreeConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut builder = Throttler::builder().name(&config.name).clock(clock);
        if let Some(damping) = config.instant_damping {
            builder = builder.instant_damping(damping);
        }
        if let Some(minimum_wait) = config.minimum_wait() {
            builder = builder.minimum_wait(minimum_wait);
        }
        let root = builder.build()?;

        let mut tree = ThrottlerTree { nodes: Vec::new() };
        tree.add(root, &config.root(), None)?;
        tracing::debug!("Built throttler tree with {} nodes", tree.nodes.len());
        Ok(tree)
    }

    /// Wraps nodes built by hand; the first one must be the root
    pub(crate) fn from_nodes(nodes: Vec<(String, Throttler)>) -> Self {
        debug_assert!(nodes.first().is_some_and(|(_, root)| root.is_root()));
        ThrottlerTree { nodes }
    }

    fn add(&mut self, throttler: Throttler, node: &NodeView<'_>, parent: Option<&str>) -> Result<()> {
        let path = match parent {
            Some(parent) => format!("{}/{}", parent, node.name),
            None => node.name.to_string(),
        };

        for quantity in node.quantities {
            throttler
                .define_throttled_quantity(&quantity.name, quantity.max_rate, quantity.throttle_mode()?)
                .and_then(|q| {
                    q.set_units(
                        &quantity.units,
                        &quantity.speed_units,
                        quantity.rate_units,
                        quantity.time_units(),
                    )
                })
                .with_context(|| format!("node '{}': quantity '{}'", path, quantity.name))?;
            tracing::trace!(
                node = %path,
                quantity = %quantity.name,
                max_rate = quantity.max_rate,
                "Defined quantity"
            );
        }
        if let Some(rate) = node.duty_cycle {
            throttler
                .set_duty_cycle(rate)
                .with_context(|| format!("node '{}': duty cycle", path))?;
        }

        let children: Vec<_> = node.children.iter().map(|c| (throttler.child(&c.name), c)).collect();
        self.nodes.push((path.clone(), throttler));
        for (child, config) in children {
            self.add(child, &config.view(), Some(&path))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Throttler {
        // build() always pushes the root first
        &self.nodes[0].1
    }

    /// Looks a node up by path
    ///
    /// The root's name may be omitted: `disk/journal` resolves like
    /// `io/disk/journal`.
    pub fn node(&self, path: &str) -> Option<&Throttler> {
        let path = path.trim_matches('/');
        let root_name = self.root().name();
        let full = if path == root_name || path.starts_with(&format!("{root_name}/")) {
            path.to_string()
        } else {
            format!("{root_name}/{path}")
        };
        self.nodes
            .iter()
            .find(|(candidate, _)| *candidate == full)
            .map(|(_, throttler)| throttler)
    }

    /// Like [`node`](Self::node), with an error listing the known paths
    pub fn require(&self, path: &str) -> Result<&Throttler> {
        self.node(path).ok_or_else(|| {
            let known: Vec<_> = self.paths().collect();
            anyhow!("unknown node '{}'. Known nodes: {}", path, known.join(", "))
        })
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(path, _)| path.as_str())
    }

    /// Every node with its path, parents first
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Throttler)> {
        self.nodes.iter().map(|(path, throttler)| (path.as_str(), throttler))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Quantities of a node that callers update, without the duty-cycle one
pub fn load_quantities(throttler: &Throttler) -> Vec<Quantity> {
    throttler
        .quantity_names()
        .iter()
        .filter(|name| name.as_str() != DUTY_CYCLE_QUANTITY)
        .filter_map(|name| throttler.quantity(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacemeter::{ManualClock, ThrottleMode};
    use std::time::Duration;

    const TREE: &str = r#"
name = "io"
minimum_wait_us = 5

[[quantities]]
name = "bytes"
max_rate = 1000
units = "KiB"
speed_units = "KiB/s"
rate_units = 1024.0

[[children]]
name = "disk"
duty_cycle = 0.5

  [[children.quantities]]
  name = "ops"
  max_rate = 10
  mode = "instant"

  [[children.children]]
  name = "journal"

[[children]]
name = "net"
"#;

    fn build() -> (Arc<ManualClock>, ThrottlerTree) {
        let clock = Arc::new(ManualClock::new());
        let config = TreeConfig::from_toml_str(TREE).unwrap();
        let tree = ThrottlerTree::build(&config, clock.clone()).unwrap();
        (clock, tree)
    }

    #[test]
    fn test_builds_nodes_depth_first() {
        let (_clock, tree) = build();
        let paths: Vec<_> = tree.paths().collect();
        assert_eq!(paths, ["io", "io/disk", "io/disk/journal", "io/net"]);
        assert_eq!(tree.len(), 4);
        assert!(tree.root().is_root());
        assert_eq!(tree.root().name(), "io");
    }

    #[test]
    fn test_node_lookup() {
        let (_clock, tree) = build();
        let journal = tree.node("io/disk/journal").unwrap();
        assert_eq!(journal.name(), "journal");
        assert_eq!(journal.parent().unwrap().name(), "disk");
        assert_eq!(tree.node("disk/journal"), Some(journal));
        assert_eq!(tree.node("/io/net/").unwrap().name(), "net");
        assert_eq!(tree.node("io"), Some(tree.root()));
        assert!(tree.node("io/disk/missing").is_none());

        let err = tree.require("tape").unwrap_err();
        assert!(err.to_string().contains("io/disk/journal"));
    }

    #[test]
    fn test_quantities_and_units_applied() {
        let (_clock, tree) = build();
        let bytes = tree.root().quantity("bytes").unwrap();
        assert_eq!(bytes.max_rate(), 1000.0);
        assert_eq!(bytes.mode(), ThrottleMode::Average);
        assert_eq!(bytes.rate_units(), 1024.0);
        assert_eq!(bytes.time_units(), Duration::from_secs(1));
        assert_eq!(bytes.speed_units_name(), "KiB/s");

        let disk = tree.node("io/disk").unwrap();
        assert_eq!(disk.quantity("ops").unwrap().mode(), ThrottleMode::Instant);
        assert_eq!(
            disk.quantity_names(),
            vec!["ops".to_string(), DUTY_CYCLE_QUANTITY.to_string()]
        );

        let updated: Vec<_> = load_quantities(disk).iter().map(|q| q.name().to_string()).collect();
        assert_eq!(updated, ["ops"]);
        assert!(load_quantities(tree.node("io/net").unwrap()).is_empty());
    }

    #[test]
    fn test_tree_shares_one_clock() {
        let (clock, tree) = build();
        let disk = tree.node("io/disk").unwrap();
        let ops = disk.quantity("ops").unwrap();

        disk.start_operation().unwrap();
        ops.update(20.0).unwrap();
        clock.advance(Duration::from_secs(1));
        let mut pause = disk.stop_operation().unwrap();
        assert_eq!(pause.amount(), Duration::from_secs(1));
        pause.wait();

        assert_eq!(clock.offset(), Duration::from_secs(2));
        assert_eq!(tree.root().total_wait_time(), Duration::from_secs(1));
        assert_eq!(tree.node("io/net").unwrap().total_wait_time(), Duration::ZERO);
    }
}
