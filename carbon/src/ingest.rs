use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use carbon_config::Config;
use carbon_metrics::{
    CollectorService, Disposition, Flush, IngestStats, LineError, LinePipeline, PayloadSummary,
    Sample, Scrape, StatsSnapshot,
};
use carbon_system::Service;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Everything collected from a single input stream.
#[derive(Debug)]
pub struct Report {
    samples: Vec<Sample>,
    summary: PayloadSummary,
    stats: StatsSnapshot,
}

impl Report {
    /// Writes the samples followed by the statistics as comments.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for sample in &self.samples {
            writeln!(writer, "{sample}")?;
        }

        writeln!(writer, "# lines dispatched: {}", self.summary.dispatched)?;
        writeln!(writer, "# lines dropped: {}", self.summary.dropped)?;
        writeln!(writer, "# lines rejected: {}", self.summary.rejected)?;
        writeln!(writer, "# invalid lines: {}", self.stats.invalid_lines)?;
        writeln!(writer, "# tag errors: {}", self.stats.tag_errors)?;
        match self.stats.last_processed {
            Some(timestamp) => writeln!(writer, "# last processed: {timestamp}")?,
            None => writeln!(writer, "# last processed: -")?,
        }

        writer.flush()
    }

    /// Writes the report to standard output.
    pub fn print(&self) -> Result<()> {
        self.write_to(io::stdout().lock())
            .context("failed to write samples to stdout")
    }
}

/// Feeds every line of `input` through the pipeline and scrapes the collector at the end.
///
/// Lines are read as raw bytes. A line that is not valid UTF-8 is rejected like any other
/// invalid line and does not stop the ingestion.
pub async fn ingest<R>(config: &Config, input: R) -> Result<Report>
where
    R: AsyncRead + Unpin,
{
    let stats = Arc::new(IngestStats::new());
    let collector = CollectorService::new(config.collector_config(), stats.clone())
        .start(config.channel_capacity());
    let pipeline = LinePipeline::new(Arc::new(config.mapper()), collector.clone(), stats.clone())
        .strict_match(config.strict_match());

    let mut summary = PayloadSummary::default();
    let mut reader = BufReader::new(input);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read input")?;
        if read == 0 {
            break;
        }

        let line = buf.strip_suffix(b"\n").unwrap_or(&buf);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        match pipeline.process_raw_line(line).await {
            Ok(Disposition::Dispatched) => summary.dispatched += 1,
            Ok(Disposition::Dropped(_)) => summary.dropped += 1,
            Err(LineError::Closed(error)) => return Err(error).context("collector stopped"),
            Err(_) => summary.rejected += 1,
        }
    }

    carbon_log::debug!(
        dispatched = summary.dispatched,
        dropped = summary.dropped,
        rejected = summary.rejected,
        "input exhausted"
    );

    collector
        .request(Flush)
        .await
        .context("failed to flush the collector")?;
    let samples = collector
        .request(Scrape)
        .await
        .context("failed to scrape the collector")?;

    Ok(Report {
        samples,
        summary,
        stats: stats.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn load_config(yaml: &str) -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yml"), yaml).unwrap();
        let config = Config::from_path(dir.path()).unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn test_ingest_report() {
        let (_dir, config) = load_config(
            r#"
ingest:
  sample_expiry: 0
mappings:
  - match: my.simple.metric
    name: my_simple_metric
    labels:
      foo: bar
  - match: my.mapped.metric.drop
    action: drop
"#,
        );

        let input = "\
my.simple.metric 9001 1534620625
my.nomap.metric 9001 1534620625

my.broken.metric
my.mapped.metric.drop 55 1534620625
my.simple.metric.with.tags;tag1=value1;tag2=value2 9002 1534620626
my.simple.metric.with.tags;tag1=value1;tag3=value2 9002 1534620626
";

        let report = ingest(&config, input.as_bytes()).await.unwrap();

        let mut output = Vec::new();
        report.write_to(&mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let (listing, last_processed) = output.rsplit_once("# last processed: ").unwrap();
        assert_ne!(last_processed, "-\n");

        assert_eq!(
            listing,
            r#"my_nomap_metric 9001
my_simple_metric{foo="bar"} 9001
my_simple_metric_with_tags{tag1="value1", tag2="value2"} 9002
# lines dispatched: 4
# lines dropped: 1
# lines rejected: 1
# invalid lines: 1
# tag errors: 1
"#
        );
    }

    #[tokio::test]
    async fn test_ingest_strict_match() {
        let (_dir, mut config) = load_config(
            "mappings:\n  - match: known.metric\n    name: known\n",
        );
        config
            .apply_override(carbon_config::OverridableConfig {
                strict_match: Some("true".to_owned()),
                sample_expiry: Some("0".to_owned()),
                ..Default::default()
            })
            .unwrap();

        let report = ingest(&config, &b"known.metric 1\r\nunknown.metric 2\r\n"[..])
            .await
            .unwrap();

        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].to_string(), "known 1");
        assert_eq!(report.summary.dispatched, 1);
        assert_eq!(report.summary.dropped, 1);
    }

    #[tokio::test]
    async fn test_ingest_survives_invalid_utf8() {
        let (_dir, config) = load_config("ingest:\n  sample_expiry: 0\n");

        let input = &b"good.one 1 1534620625\nbad\xff 2 1534620625\ngood.two 3 1534620625"[..];
        let report = ingest(&config, input).await.unwrap();

        let names: Vec<_> = report.samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["good_one", "good_two"]);
        assert_eq!(report.summary.dispatched, 2);
        assert_eq!(report.summary.rejected, 1);
        assert_eq!(report.stats.invalid_lines, 1);
    }
}
