//! hubwire demo runner.
//!
//! Binary name: `hubwire`
//!
//! Parses CLI arguments, sets up tracing, loads the hub configuration, then
//! runs the selected demo topology to completion.

mod cli;

use std::time::Duration;

use clap::Parser;
use hubwire_core::config::{default_config_path, load_hub_config};
use hubwire_observe::tracing_setup::{init_tracing, shutdown_tracing, verbosity_filter};
use hubwire_types::config::HubConfig;

use cli::kennel::Dog;
use cli::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(
        verbosity_filter(cli.verbose, cli.quiet),
        cli.log_format.into(),
        cli.otel,
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_hub_config(&config_path).await;
    tracing::debug!(path = %config_path.display(), ?config, "hub configuration");

    let outcome = run(cli.command, config).await;
    shutdown_tracing();
    outcome
}

async fn run(command: Commands, config: HubConfig) -> anyhow::Result<()> {
    match command {
        Commands::Veggies {
            tomato_delay_ms,
            deadline_ms,
        } => {
            let lines = cli::veggies::run(
                config,
                Duration::from_millis(tomato_delay_ms),
                Duration::from_millis(deadline_ms),
            )
            .await?;
            for line in lines {
                println!("LOGGING >> {line}");
            }
        }

        Commands::Kennel { dogs, json } => {
            let dogs = dogs
                .iter()
                .map(|spec| Dog::parse(spec))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = cli::kennel::run(config, &dogs).await?;

            for line in &report.logs {
                println!("LOGGING >> {line}");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for (id, dog) in report.added.iter().zip(&dogs) {
                    println!("added #{id}: {} ({})", dog.name, dog.breed);
                }
                println!("kennel has {} dogs:", report.dogs.len());
                for dog in &report.dogs {
                    println!("  {} ({})", dog.name, dog.breed);
                }
            }
        }
    }
    Ok(())
}
