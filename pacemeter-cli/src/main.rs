use anyhow::Result;

use pacemeter_cli::config::{Command, Config};
use pacemeter_cli::{copy, simulate};

fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging; stdout may carry copied data
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("pacemeter={}", config.log_level).parse()?)
                .add_directive(format!("pacemeter_cli={}", config.log_level).parse()?),
        )
        .init();

    match &config.command {
        Command::Copy(copy_config) => {
            copy::run(copy_config, config.tree.as_ref())?;
        }
        Command::Simulate(simulate_config) => {
            let tree = config
                .tree
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("simulate needs a throttler tree"))?;
            let summary = simulate::run(simulate_config, tree)?;
            println!("{summary}");
        }
    }

    Ok(())
}
