//! Summaries of throttler state for humans and machines

use pacemeter::{ApproxDuration, Quantity, Throttler};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::metrics::MetricsSnapshot;
use crate::tree::ThrottlerTree;

const REPORT_PRECISION: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Serialize)]
pub struct QuantityReport {
    pub name: String,
    pub mode: String,
    pub value: f64,
    pub units: String,
    pub max_rate: f64,
    pub average_rate: f64,
    pub instant_rate: f64,
    pub speed_units: String,
}

impl QuantityReport {
    pub fn from_quantity(quantity: &Quantity) -> Self {
        QuantityReport {
            name: quantity.name().to_string(),
            mode: quantity.mode().to_string(),
            value: quantity.value(),
            units: quantity.units_name(),
            max_rate: quantity.max_rate(),
            average_rate: quantity.average_rate(),
            instant_rate: quantity.instant_rate(),
            speed_units: quantity.speed_units_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub path: String,
    pub elapsed_secs: f64,
    pub total_wait_secs: f64,
    pub duty_cycle: f64,
    pub quantities: Vec<QuantityReport>,
}

impl NodeReport {
    pub fn from_throttler(path: &str, throttler: &Throttler) -> Self {
        NodeReport {
            path: path.to_string(),
            elapsed_secs: seconds(throttler.elapsed_time()),
            total_wait_secs: seconds(throttler.total_wait_time()),
            duty_cycle: throttler.duty_cycle(),
            quantities: throttler
                .quantity_names()
                .iter()
                .filter_map(|name| throttler.quantity(name))
                .map(|q| QuantityReport::from_quantity(&q))
                .collect(),
        }
    }
}

fn seconds(duration: Duration) -> f64 {
    duration.in_auto_units(REPORT_PRECISION).as_secs_f64()
}

fn approx(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0)).in_auto_units(REPORT_PRECISION)
}

/// Whole-tree summary
#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    pub nodes: Vec<NodeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pauses: Option<MetricsSnapshot>,
}

impl TreeReport {
    pub fn from_tree(tree: &ThrottlerTree, pauses: Option<MetricsSnapshot>) -> Self {
        TreeReport {
            nodes: tree
                .nodes()
                .map(|(path, throttler)| NodeReport::from_throttler(path, throttler))
                .collect(),
            pauses,
        }
    }
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}: elapsed {:?}, waited {:?}, duty cycle {:.1}%",
            self.path,
            approx(self.elapsed_secs),
            approx(self.total_wait_secs),
            self.duty_cycle * 100.0
        )?;
        for q in &self.quantities {
            let limit = if q.max_rate > 0.0 {
                format!("{:.3}", q.max_rate)
            } else {
                "unlimited".to_string()
            };
            writeln!(
                f,
                "  {} ({}): {:.3} {}, average {:.3} {}, instant {:.3}, limit {}",
                q.name,
                q.mode,
                q.value,
                q.units,
                q.average_rate,
                q.speed_units,
                q.instant_rate,
                limit
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for TreeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{node}")?;
        }
        if let Some(pauses) = &self.pauses {
            writeln!(
                f,
                "pauses: {} computed, {} throttled ({} instant, {} average), {:?} requested",
                pauses.pauses,
                pauses.throttled,
                pauses.instant,
                pauses.average,
                Duration::from_micros(pauses.requested_wait_micros).in_auto_units(REPORT_PRECISION)
            )?;
        }
        Ok(())
    }
}
