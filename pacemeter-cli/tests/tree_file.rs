//! Tree files on disk driving copies and simulations

use pacemeter::ManualClock;
use pacemeter_cli::config::{CopyConfig, ReportFormat, SimulateConfig, TreeConfig};
use pacemeter_cli::copy::{CopyTarget, copy_through};
use pacemeter_cli::simulate::simulate;
use pacemeter_cli::tree::ThrottlerTree;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

const TREE: &str = r#"
name = "host"

[[children]]
name = "backup"

  [[children.quantities]]
  name = "bytes"
  max_rate = 4096
  units = "B"
  speed_units = "B/s"

[[children]]
name = "api"
duty_cycle = 0.5

  [[children.quantities]]
  name = "requests"
  max_rate = 20
  mode = "both"
"#;

fn write_tree(dir: &tempfile::TempDir) -> TreeConfig {
    let path = dir.path().join("limits.toml");
    fs::write(&path, TREE).unwrap();
    TreeConfig::from_file(&path).unwrap()
}

#[test]
fn test_copy_file_through_tree_node() {
    let dir = tempfile::tempdir().unwrap();
    let tree = write_tree(&dir);

    let input_path = dir.path().join("input.bin");
    let output_path = dir.path().join("output.bin");
    let data: Vec<u8> = (0..16_384u32).map(|i| (i % 251) as u8).collect();
    fs::write(&input_path, &data).unwrap();

    let config = CopyConfig {
        input: Some(input_path.clone()),
        output: Some(output_path.clone()),
        rate: None,
        mode: Default::default(),
        chunk: 4096,
        node: Some("host/backup".to_string()),
        quantity: "bytes".to_string(),
    };
    let clock = Arc::new(ManualClock::new());
    let target = CopyTarget::resolve(&config, Some(&tree), clock.clone()).unwrap();
    clock.advance(Duration::from_millis(1));

    let input = fs::File::open(&input_path).unwrap();
    let output = fs::File::create(&output_path).unwrap();
    let summary = copy_through(&target, input, output, config.chunk).unwrap();

    assert_eq!(fs::read(&output_path).unwrap(), data);
    assert_eq!(summary.bytes, 16_384);
    // 16 KiB at 4 KiB/s
    assert!(summary.elapsed_secs >= 3.99, "{summary}");
    assert!(target.quantity().average_rate() <= 4096.0 * (1.0 + 1e-5));

    let tree = target.tree();
    assert_eq!(
        tree.root().total_wait_time(),
        tree.node("backup").unwrap().total_wait_time()
    );
    assert_eq!(tree.node("api").unwrap().total_wait_time(), Duration::ZERO);
}

#[test]
fn test_simulate_tree_file() {
    let dir = tempfile::tempdir().unwrap();
    let tree_config = write_tree(&dir);
    let clock = Arc::new(ManualClock::new());
    let tree = ThrottlerTree::build(&tree_config, clock).unwrap();

    let config = SimulateConfig {
        operations: 20,
        workers: 1,
        increment: 1.0,
        work: Duration::from_millis(20),
        seed: Some(1),
        format: ReportFormat::Json,
    };
    let outcome = simulate(&tree, &config).unwrap();

    // Both limited nodes ran their operations
    assert_eq!(outcome.metrics.snapshot().pauses, 40);
    assert_eq!(tree.node("backup").unwrap().quantity("bytes").unwrap().max_rate(), 4096.0);

    // A few bytes never reach the backup limit; the api is held to its duty cycle
    assert_eq!(tree.node("backup").unwrap().total_wait_time(), Duration::ZERO);
    let api = tree.node("api").unwrap();
    assert!(api.total_wait_time() > Duration::ZERO);
    assert_eq!(tree.root().total_wait_time(), api.total_wait_time());

    let json: serde_json::Value =
        serde_json::from_str(&outcome.render(ReportFormat::Json).unwrap()).unwrap();
    let paths: Vec<_> = json["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, ["host", "host/backup", "host/api"]);
}
