use anyhow::{Context, Result};
use carbon_config::Config;
use carbon_statsd::MetricsConfig;

/// Initializes logging from the config.
pub fn init_logging(config: &Config) {
    carbon_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if Config::config_exists(config.path()) {
        carbon_log::info!(
            "launching carbon from config folder {}",
            config.path().display()
        );
    } else {
        carbon_log::info!(
            "launching carbon with default config ({} has no config file)",
            config.path().display()
        );
    }

    carbon_log::info!("  log level: {}", config.logging().level);
    carbon_log::info!("  strict match: {}", config.strict_match());
    carbon_log::info!("  channel capacity: {}", config.channel_capacity());

    let collector = config.collector_config();
    carbon_log::info!("  sample expiry: {}s", collector.sample_expiry.as_secs());
}

/// Initializes the metrics system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    carbon_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        buffer_size: config.statsd_buffer_size(),
        default_tags: config.metrics_default_tags().clone(),
    })
    .with_context(|| format!("failed to report internal metrics to {host}"))?;

    carbon_log::info!("reporting internal metrics to {host}");
    Ok(())
}
