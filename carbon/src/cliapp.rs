//! Command line definition of the Carbon binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Ingests Graphite plaintext lines into labeled samples.
#[derive(Debug, Parser)]
#[command(name = "carbon", version, about, long_about = None)]
pub struct Cli {
    /// The path to the config folder.
    #[arg(
        long,
        short = 'c',
        global = true,
        value_name = "CONFIG",
        env = "CARBON_CONFIG_PATH",
        default_value = ".carbon"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest lines from standard input and print the collected samples once the input ends.
    Run(RunArgs),
    /// Manage the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Overrides for values of the config file.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Drop lines whose metric name matches no mapping.
    #[arg(long, value_name = "BOOL", env = "CARBON_STRICT_MATCH")]
    pub strict_match: Option<String>,

    /// The log level of Carbon's own crates.
    #[arg(long, value_name = "LEVEL", env = "CARBON_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Host and port of a StatsD server for internal metrics. Empty to disable.
    #[arg(long, value_name = "ADDR", env = "CARBON_STATSD")]
    pub statsd: Option<String>,

    /// Maximum sample age in seconds. 0 disables expiry.
    #[arg(long, value_name = "SECONDS", env = "CARBON_SAMPLE_EXPIRY")]
    pub sample_expiry: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration.
    Show,
    /// Write a configuration file with the default values, unless one exists.
    Init,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "carbon",
            "--config",
            "/etc/carbon",
            "run",
            "--strict-match",
            "true",
            "--sample-expiry",
            "0",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/carbon"));
        let Command::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.strict_match.as_deref(), Some("true"));
        assert_eq!(args.sample_expiry.as_deref(), Some("0"));
        assert_eq!(args.log_level, None);
    }

    #[test]
    fn test_parse_config_commands() {
        let cli = Cli::try_parse_from(["carbon", "config", "init", "-c", "conf"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("conf"));
        assert!(matches!(cli.command, Command::Config(ConfigCommand::Init)));

        assert!(Cli::try_parse_from(["carbon"]).is_err());
    }
}
