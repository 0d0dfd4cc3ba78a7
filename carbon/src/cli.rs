use anyhow::{Context, Result};
use carbon_config::{Config, OverridableConfig};
use clap::Parser;

use crate::cliapp::{Cli, Command, ConfigCommand, RunArgs};
use crate::{ingest, setup};

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_path(&cli.config)?;

    match cli.command {
        Command::Run(args) => {
            config.apply_override(extract_config_args(args))?;
            run(config)
        }
        Command::Config(ConfigCommand::Show) => show_config(&config),
        Command::Config(ConfigCommand::Init) => init_config(&config),
    }
}

/// Extracts config overrides from the command line arguments of the `run` command.
fn extract_config_args(args: RunArgs) -> OverridableConfig {
    OverridableConfig {
        strict_match: args.strict_match,
        log_level: args.log_level,
        statsd: args.statsd,
        sample_expiry: args.sample_expiry,
    }
}

#[allow(clippy::print_stdout)]
fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn init_config(config: &Config) -> Result<()> {
    if Config::config_exists(config.path()) {
        println!("config already exists in {}", config.path().display());
        return Ok(());
    }

    config.save_in_folder(config.path())?;
    println!("wrote config to {}", config.path().display());
    Ok(())
}

/// Ingests standard input until it ends and prints the collected samples.
pub fn run(config: Config) -> Result<()> {
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("carbon-worker")
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    let report = runtime.block_on(ingest::ingest(&config, tokio::io::stdin()))?;
    report.print()?;

    carbon_log::info!("shutting down");
    Ok(())
}
