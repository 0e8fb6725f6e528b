use anyhow::{Context, Result};
use objbench_engine::Orchestrator;
use tracing::level_filters::LevelFilter;

use crate::config::Config;
use crate::report::{self, ConsoleReporter};
use crate::storage;

/// Runs all configured loops and prints the results.
pub async fn run(config: Config) -> Result<()> {
    let run_config = config
        .run_config()
        .context("invalid benchmark configuration")?;

    report::print_parameters(&config, &run_config);

    let backend = storage::connect(&config, &run_config).await?;
    tracing::info!(backend = backend.name(), "storage backend ready");

    let orchestrator = Orchestrator::new(run_config, backend);
    let mut reporter = ConsoleReporter::new();

    match orchestrator.run(&mut reporter).await {
        Ok(summary) => {
            report::print_summary(&summary);
            println!();
            println!("Done.");
            Ok(())
        }
        Err(error) => {
            if config.logging.level < LevelFilter::DEBUG {
                eprintln!("Run again with --verbose to see the errors of individual requests.");
            }
            Err(error).context("benchmark aborted")
        }
    }
}
