//! Synthetic load on every limited node of a throttler tree
//!
//! Each node with quantities gets its own workers. A worker runs operation
//! brackets back to back: it updates every quantity of its node by a
//! jittered increment, spends a jittered amount of time inside the bracket,
//! then waits out the pause the bracket produced. Workers on one node
//! contend for its bracket; waits across the tree run one at a time.

use anyhow::{Result, anyhow};
use pacemeter::{Quantity, SystemClock, Throttler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{ReportFormat, SimulateConfig, TreeConfig};
use crate::metrics::PauseMetrics;
use crate::report::TreeReport;
use crate::tree::{ThrottlerTree, load_quantities};

/// Result of a finished simulation
pub struct SimulationOutcome {
    pub report: TreeReport,
    /// Wall time of the run as measured by the tree's clock
    pub elapsed: Duration,
    pub metrics: Arc<PauseMetrics>,
}

impl SimulationOutcome {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(self.report.to_string()),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(&self.report)?),
            ReportFormat::Prometheus => Ok(self.metrics.export_prometheus(self.elapsed)),
        }
    }
}

struct Worker<'a> {
    path: &'a str,
    node: &'a Throttler,
    quantities: Vec<Quantity>,
    rng: StdRng,
}

impl Worker<'_> {
    fn run(mut self, config: &SimulateConfig) -> Result<()> {
        for op in 0..config.operations {
            self.node.start_operation()?;
            for quantity in &self.quantities {
                let increment = config.increment * self.rng.gen_range(0.5..1.5);
                quantity.update(increment)?;
            }
            let work = config.work.mul_f64(self.rng.gen_range(0.5..1.5));
            self.node.clock().sleep(work);

            let mut pause = self.node.stop_operation()?;
            if pause.is_needed() {
                tracing::debug!(node = %self.path, op, "{}", pause);
            }
            pause.wait();
        }
        Ok(())
    }
}

/// Drives every node of `tree` that has quantities and collects a report
pub fn simulate(tree: &ThrottlerTree, config: &SimulateConfig) -> Result<SimulationOutcome> {
    let metrics = Arc::new(PauseMetrics::new());
    metrics.attach(tree.root());

    let mut seeds = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut workers = Vec::new();
    for (path, node) in tree.nodes() {
        let quantities = load_quantities(node);
        if quantities.is_empty() {
            continue;
        }
        for _ in 0..config.workers {
            workers.push(Worker {
                path,
                node,
                quantities: quantities.clone(),
                rng: StdRng::seed_from_u64(seeds.r#gen()),
            });
        }
    }
    if workers.is_empty() {
        return Err(anyhow!(
            "the tree has no quantities to load. Define [[quantities]] on at least one node"
        ));
    }

    tracing::info!(
        "Simulating {} operations on each of {} workers",
        config.operations,
        workers.len()
    );
    let clock = tree.root().clock();
    let started = clock.now();

    thread::scope(|scope| {
        let handles: Vec<_> = workers
            .into_iter()
            .map(|worker| scope.spawn(move || worker.run(config)))
            .collect();
        handles.into_iter().try_for_each(|handle| {
            handle
                .join()
                .map_err(|_| anyhow!("simulation worker panicked"))?
        })
    })?;

    let elapsed = clock.now().saturating_duration_since(started);
    tree.root().clear_update_callback();
    Ok(SimulationOutcome {
        report: TreeReport::from_tree(tree, Some(metrics.snapshot())),
        elapsed,
        metrics,
    })
}

/// Runs the `simulate` subcommand in real time and renders its summary
pub fn run(config: &SimulateConfig, tree_config: &TreeConfig) -> Result<String> {
    let tree = ThrottlerTree::build(tree_config, Arc::new(SystemClock))?;
    let outcome = simulate(&tree, config)?;
    tracing::info!("Simulation finished in {:?}", outcome.elapsed);
    outcome.render(config.format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacemeter::ManualClock;

    const TREE: &str = r#"
name = "service"

[[children]]
name = "disk"

  [[children.quantities]]
  name = "ops"
  max_rate = 100

  [[children.quantities]]
  name = "bytes"

[[children]]
name = "idle"
"#;

    fn config(format: ReportFormat) -> SimulateConfig {
        SimulateConfig {
            operations: 50,
            workers: 1,
            increment: 10.0,
            work: Duration::from_millis(10),
            seed: Some(7),
            format,
        }
    }

    fn tree() -> (Arc<ManualClock>, ThrottlerTree) {
        let clock = Arc::new(ManualClock::new());
        let tree_config = TreeConfig::from_toml_str(TREE).unwrap();
        let tree = ThrottlerTree::build(&tree_config, clock.clone()).unwrap();
        (clock, tree)
    }

    #[test]
    fn test_simulation_respects_limits() {
        let (clock, tree) = tree();
        let outcome = simulate(&tree, &config(ReportFormat::Text)).unwrap();

        let disk = tree.node("disk").unwrap();
        let ops = disk.quantity("ops").unwrap();
        assert!(ops.value() >= 250.0 && ops.value() <= 750.0, "{}", ops.value());
        assert!(ops.average_rate() <= 100.0 * (1.0 + 1e-5));
        assert_eq!(disk.quantity("bytes").unwrap().max_rate(), 0.0);

        let snapshot = outcome.metrics.snapshot();
        assert_eq!(snapshot.pauses, 50);
        assert!(snapshot.throttled > 0);
        assert_eq!(outcome.elapsed, clock.offset());
        assert_eq!(tree.root().total_wait_time(), disk.total_wait_time());
        assert_eq!(tree.node("idle").unwrap().total_wait_time(), Duration::ZERO);
    }

    #[test]
    fn test_same_seed_same_load() {
        let (_clock, first) = tree();
        let (_clock, second) = tree();
        simulate(&first, &config(ReportFormat::Text)).unwrap();
        simulate(&second, &config(ReportFormat::Text)).unwrap();

        let value = |tree: &ThrottlerTree| {
            tree.node("disk")
                .unwrap()
                .quantity("bytes")
                .unwrap()
                .value()
        };
        assert_eq!(value(&first), value(&second));
    }

    #[test]
    fn test_renders_every_format() {
        let (_clock, tree) = tree();
        let outcome = simulate(&tree, &config(ReportFormat::Text)).unwrap();

        let text = outcome.render(ReportFormat::Text).unwrap();
        assert!(text.contains("service/disk: elapsed"));
        assert!(text.contains("pauses: 50 computed"));

        let json: serde_json::Value =
            serde_json::from_str(&outcome.render(ReportFormat::Json).unwrap()).unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(json["pauses"]["pauses"], 50);

        let prometheus = outcome.render(ReportFormat::Prometheus).unwrap();
        assert!(prometheus.contains("pacemeter_pauses_total 50\n"));
    }

    #[test]
    fn test_tree_without_quantities() {
        let clock = Arc::new(ManualClock::new());
        let tree_config = TreeConfig::from_toml_str("name = \"empty\"").unwrap();
        let tree = ThrottlerTree::build(&tree_config, clock).unwrap();
        assert!(simulate(&tree, &config(ReportFormat::Text)).is_err());
    }
}
