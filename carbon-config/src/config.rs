use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use carbon_log::{LogConfig, LogLevel};
use carbon_metrics::{
    CollectorConfig, Labels, MappingAction, MappingResult, Retention, StaticMapper,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Defines the source of a config error.
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => write!(f, "{}", self.kind),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Semantic problems in an otherwise well-formed config file.
#[derive(Debug, thiserror::Error)]
enum ValidationError {
    #[error("ingest.channel_capacity must be greater than zero")]
    ZeroChannelCapacity,
    #[error("mapping for {0:?} keeps the metric but has no target name")]
    MissingTargetName(String),
}

/// An override value that is neither true nor false.
#[derive(Debug, thiserror::Error)]
#[error("expected a boolean, got {0:?}")]
struct ParseBoolError(String);

fn parse_bool(value: &str) -> Result<bool, ParseBoolError> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ParseBoolError(value.to_owned())),
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.yml", Self::name()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        serde_yaml::from_reader(io::BufReader::new(f))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        serde_yaml::to_writer(writer, self)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        // Remove all non-user permissions for the newly created file
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Configuration values that can be overridden via CLI parameters or environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// "true" to drop lines without a mapping, "false" otherwise.
    pub strict_match: Option<String>,
    /// The log level of Carbon's own crates.
    pub log_level: Option<String>,
    /// Address of the StatsD server for internal metrics. An empty string disables them.
    pub statsd: Option<String>,
    /// Maximum sample age in seconds.
    pub sample_expiry: Option<String>,
}

/// Internal metrics reported over StatsD.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct Metrics {
    /// Host and port of the StatsD server. Internal metrics are disabled if not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    statsd: Option<String>,
    /// Common prefix prepended to all metric names.
    prefix: String,
    /// Tags attached to every metric.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    default_tags: BTreeMap<String, String>,
    /// Size of the UDP send buffer in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    buffer_size: Option<usize>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "carbon".to_owned(),
            default_tags: BTreeMap::new(),
            buffer_size: None,
        }
    }
}

/// Controls the ingestion pipeline and the collector.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct Ingest {
    /// Drop lines whose name matches no mapping.
    strict_match: bool,
    /// Capacity of the channel between producers and the collector.
    channel_capacity: usize,
    /// Maximum sample age in seconds. Zero disables expiry.
    sample_expiry: u64,
    /// Retention of samples between scrapes.
    retention: Retention,
    /// Interval between purges of expired samples in seconds.
    expiry_interval: u64,
}

impl Default for Ingest {
    fn default() -> Self {
        Self {
            strict_match: false,
            channel_capacity: 1024,
            sample_expiry: 300,
            retention: Retention::Persist,
            expiry_interval: 60,
        }
    }
}

/// A mapping rule for an exact metric name.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct MappingConfig {
    /// The metric name as it appears in lines, without tags.
    #[serde(rename = "match")]
    name_match: String,
    /// The target name. Required unless the rule drops the metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    /// Labels replacing all inline tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    action: MappingAction,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ConfigValues {
    logging: LogConfig,
    metrics: Metrics,
    ingest: Ingest,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mappings: Vec<MappingConfig>,
}

impl ConfigValues {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.ingest.channel_capacity == 0 {
            return Err(ValidationError::ZeroChannelCapacity);
        }

        for mapping in &self.mappings {
            if mapping.action == MappingAction::Keep && mapping.name.is_none() {
                return Err(ValidationError::MissingTargetName(mapping.name_match.clone()));
            }
        }

        Ok(())
    }
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Debug)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// If the folder contains no config file, all values are defaulted.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = if Self::config_exists(&path) {
            ConfigValues::load(&path)?
        } else {
            ConfigValues::default()
        };

        values.validate().map_err(|e| {
            ConfigError::wrap(e, ConfigErrorKind::InvalidValue).file(ConfigValues::path(&path))
        })?;

        Ok(Config { values, path })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        if let Some(strict_match) = overrides.strict_match {
            self.values.ingest.strict_match = parse_bool(&strict_match)
                .map_err(|err| ConfigError::for_field(err, "strict_match"))?;
        }

        if let Some(log_level) = overrides.log_level {
            self.values.logging.level = log_level
                .parse::<LogLevel>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd).filter(|s| !s.is_empty());
        }

        if let Some(sample_expiry) = overrides.sample_expiry {
            self.values.ingest.sample_expiry = sample_expiry
                .parse()
                .map_err(|err| ConfigError::for_field(err, "sample_expiry"))?;
        }

        Ok(self)
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the folder of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the config into the given folder, creating it if necessary.
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.values.save(path)
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the StatsD server, if internal metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix for internal metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for internal metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the UDP buffer size for internal metrics.
    pub fn statsd_buffer_size(&self) -> Option<usize> {
        self.values.metrics.buffer_size
    }

    /// Returns `true` if lines without a mapping are dropped.
    pub fn strict_match(&self) -> bool {
        self.values.ingest.strict_match
    }

    /// Returns the capacity of the collector's inbox.
    pub fn channel_capacity(&self) -> usize {
        self.values.ingest.channel_capacity
    }

    /// Returns the configuration of the collector service.
    pub fn collector_config(&self) -> CollectorConfig {
        let ingest = &self.values.ingest;
        CollectorConfig {
            retention: ingest.retention,
            sample_expiry: Duration::from_secs(ingest.sample_expiry),
            expiry_interval: Duration::from_secs(ingest.expiry_interval),
        }
    }

    /// Builds a mapper from the configured mapping rules.
    pub fn mapper(&self) -> StaticMapper {
        let mut mapper = StaticMapper::new();

        for mapping in &self.values.mappings {
            let result = match (mapping.action, &mapping.name) {
                (MappingAction::Keep, Some(name)) => {
                    MappingResult::keep(name.as_str(), mapping.labels.iter().collect::<Labels>())
                }
                // Rules keeping a metric without a name are rejected when loading.
                (MappingAction::Keep, None) | (MappingAction::Drop, _) => MappingResult::dropped(),
            };
            mapper.insert(mapping.name_match.as_str(), result);
        }

        mapper
    }
}

#[cfg(test)]
mod tests {
    use carbon_log::LogFormat;
    use carbon_metrics::{Mapper, MetricType};
    use similar_asserts::assert_eq;

    use super::*;

    fn write_config(dir: &Path, yaml: &str) {
        fs::write(dir.join("config.yml"), yaml).unwrap();
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_path(dir.path()).unwrap();

        assert!(!Config::config_exists(dir.path()));
        assert_eq!(config.logging().level, LogLevel::Info);
        assert_eq!(config.statsd_addr(), None);
        assert_eq!(config.metrics_prefix(), "carbon");
        assert!(!config.strict_match());
        assert_eq!(config.channel_capacity(), 1024);

        let collector = config.collector_config();
        assert_eq!(collector.retention, Retention::Persist);
        assert_eq!(collector.sample_expiry, Duration::from_secs(300));
        assert_eq!(collector.expiry_interval, Duration::from_secs(60));
        assert!(config.mapper().is_empty());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
logging:
  level: debug
  format: json
metrics:
  statsd: "127.0.0.1:8125"
  default_tags:
    region: eu
ingest:
  strict_match: true
  sample_expiry: 0
  retention: clear_on_scrape
"#,
        );

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.logging().level, LogLevel::Debug);
        assert_eq!(config.logging().format, LogFormat::Json);
        assert_eq!(config.statsd_addr(), Some("127.0.0.1:8125"));
        assert_eq!(config.metrics_prefix(), "carbon");
        assert_eq!(config.metrics_default_tags().get("region").unwrap(), "eu");
        assert!(config.strict_match());
        assert_eq!(config.channel_capacity(), 1024);

        let collector = config.collector_config();
        assert_eq!(collector.retention, Retention::ClearOnScrape);
        assert_eq!(collector.sample_expiry, Duration::ZERO);
    }

    #[test]
    fn test_mappings() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            r#"
mappings:
  - match: my.simple.metric
    name: my_simple_metric
    labels:
      zip: zot
      foo: bar
  - match: my.mapped.metric.drop
    action: drop
"#,
        );

        let config = Config::from_path(dir.path()).unwrap();
        let mapper = config.mapper();
        assert_eq!(mapper.len(), 2);

        let kept = mapper.resolve("my.simple.metric", MetricType::Gauge);
        assert!(kept.matched);
        assert_eq!(kept.action, MappingAction::Keep);
        assert_eq!(kept.target_name, "my_simple_metric");
        assert_eq!(kept.static_labels.to_string(), r#"{foo="bar", zip="zot"}"#);

        let dropped = mapper.resolve("my.mapped.metric.drop", MetricType::Gauge);
        assert!(dropped.matched);
        assert_eq!(dropped.action, MappingAction::Drop);

        assert!(!mapper.resolve("my.nomap.metric", MetricType::Gauge).matched);
    }

    #[test]
    fn test_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "ingest: [1, 2");

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.source().is_some());
        assert!(
            error
                .to_string()
                .starts_with("could not parse yaml config file (file ")
        );
    }

    #[test]
    fn test_unknown_action() {
        let dir = tempfile::tempdir().unwrap();
        write_config(
            dir.path(),
            "mappings:\n  - match: foo\n    name: bar\n    action: skip\n",
        );

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
    }

    #[test]
    fn test_zero_channel_capacity() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "ingest:\n  channel_capacity: 0\n");

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(
            error.source().unwrap().to_string(),
            "ingest.channel_capacity must be greater than zero"
        );
    }

    #[test]
    fn test_keep_mapping_requires_name() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "mappings:\n  - match: foo.bar\n");

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(
            error.source().unwrap().to_string(),
            r#"mapping for "foo.bar" keeps the metric but has no target name"#
        );
    }

    #[test]
    fn test_apply_override() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "metrics:\n  statsd: \"127.0.0.1:8125\"\n");
        let mut config = Config::from_path(dir.path()).unwrap();

        config
            .apply_override(OverridableConfig {
                strict_match: Some("TRUE".to_owned()),
                log_level: Some("trace".to_owned()),
                statsd: Some(String::new()),
                sample_expiry: Some("30".to_owned()),
            })
            .unwrap();

        assert!(config.strict_match());
        assert_eq!(config.logging().level, LogLevel::Trace);
        assert_eq!(config.statsd_addr(), None);
        assert_eq!(
            config.collector_config().sample_expiry,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = Config::from_path(tempfile::tempdir().unwrap().path()).unwrap();

        let error = config
            .apply_override(OverridableConfig {
                strict_match: Some("yes please".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field strict_match)");

        let error = config
            .apply_override(OverridableConfig {
                sample_expiry: Some("-1".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.to_string(), "invalid config value (field sample_expiry)");

        let error = config
            .apply_override(OverridableConfig {
                log_level: Some("loud".to_owned()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(error.source().unwrap().to_string(), "unknown log level `loud`");
    }

    #[test]
    fn test_save_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("nested").join(".carbon");

        let mut config = Config::from_path(&folder).unwrap();
        config
            .apply_override(OverridableConfig {
                strict_match: Some("1".to_owned()),
                ..Default::default()
            })
            .unwrap();
        config.save_in_folder(&folder).unwrap();
        assert!(Config::config_exists(&folder));

        let reloaded = Config::from_path(&folder).unwrap();
        assert!(reloaded.strict_match());
        assert_eq!(reloaded.to_yaml_string().unwrap(), config.to_yaml_string().unwrap());
    }

    #[test]
    fn test_default_yaml() {
        let config = Config::from_path(tempfile::tempdir().unwrap().path()).unwrap();
        insta::assert_snapshot!(config.to_yaml_string().unwrap(), @r###"
        logging:
          level: info
          format: auto
          enable_backtraces: false
        metrics:
          prefix: carbon
        ingest:
          strict_match: false
          channel_capacity: 1024
          sample_expiry: 300
          retention: persist
          expiry_interval: 60
        "###);
    }
}
