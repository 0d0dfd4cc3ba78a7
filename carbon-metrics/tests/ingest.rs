use std::sync::Arc;
use std::time::Duration;

use carbon_metrics::{
    Collector, CollectorConfig, CollectorService, Disposition, DropReason, Flush, IngestStats,
    Labels, LineError, LinePipeline, Mapper, MappingAction, MappingResult, MetricType, NoopMapper,
    Scrape,
};
use carbon_system::{Addr, Service};
use similar_asserts::assert_eq;

/// A mapper returning the same result for every name.
#[derive(Debug)]
struct FixedMapper(MappingResult);

impl Mapper for FixedMapper {
    fn resolve(&self, _name: &str, _ty: MetricType) -> MappingResult {
        self.0.clone()
    }
}

struct Case {
    line: &'static str,
    mapping: MappingResult,
    strict: bool,
}

fn start_collector(stats: &Arc<IngestStats>) -> Addr<Collector> {
    let config = CollectorConfig {
        sample_expiry: Duration::ZERO,
        ..Default::default()
    };
    CollectorService::new(config, stats.clone()).start(64)
}

async fn scrape(collector: &Addr<Collector>) -> Vec<String> {
    collector.request(Flush).await.unwrap();
    let samples = collector.request(Scrape).await.unwrap();
    samples.iter().map(ToString::to_string).collect()
}

fn keep(name: &str, labels: &[(&str, &str)]) -> MappingResult {
    MappingResult::keep(name, labels.iter().copied().collect())
}

#[tokio::test]
async fn test_process_lines() {
    carbon_log::init_test!();

    let cases = [
        Case {
            line: "my.simple.metric 9001 1534620625",
            mapping: keep(
                "my_simple_metric",
                &[("foo", "bar"), ("zip", "zot"), ("name", "alabel")],
            ),
            strict: false,
        },
        Case {
            // Mapped onto an existing name with different label keys. Mapped labels are exempt
            // from the label key check, so both samples are stored.
            line: "my.simple.metric.baz 9002 1534620625",
            mapping: keep("my_simple_metric", &[("baz", "bat")]),
            strict: false,
        },
        Case {
            line: "my.nomap.metric 9001 1534620625",
            mapping: MappingResult::unmatched(),
            strict: false,
        },
        Case {
            line: "my.nomap.metric.novalue 9001 ",
            mapping: keep("my_nomap_metric_novalue", &[]),
            strict: false,
        },
        Case {
            line: "my.mapped.metric.drop 55 1534620625",
            mapping: MappingResult {
                action: MappingAction::Drop,
                ..keep("my_mapped_metric_drop", &[])
            },
            strict: false,
        },
        Case {
            line: "my.mapped.strict.metric 55 1534620625",
            mapping: keep("my_mapped_strict_metric", &[]),
            strict: true,
        },
        Case {
            line: "my.mapped.strict.metric.drop 55 1534620625",
            mapping: MappingResult::unmatched(),
            strict: true,
        },
        Case {
            line: "my.simple.metric.with.tags;tag1=value1;tag2=value2 9002 1534620625",
            mapping: MappingResult::unmatched(),
            strict: false,
        },
        Case {
            // Same tag keys with different values.
            line: "my.simple.metric.with.tags;tag1=value3;tag2=value4 9002 1534620625",
            mapping: MappingResult::unmatched(),
            strict: false,
        },
        Case {
            // A new tag key replacing a previous one.
            line: "my.simple.metric.with.tags;tag1=value1;tag3=value2 9002 1534620625",
            mapping: MappingResult::unmatched(),
            strict: false,
        },
    ];

    let stats = Arc::new(IngestStats::new());
    let collector = start_collector(&stats);

    let mut dispositions = Vec::new();
    for case in cases {
        let mapper = Arc::new(FixedMapper(case.mapping));
        let pipeline = LinePipeline::new(mapper, collector.clone(), stats.clone())
            .strict_match(case.strict);

        dispositions.push(match pipeline.process_line(case.line).await {
            Ok(disposition) => format!("{disposition:?}"),
            Err(error) => format!("{error}"),
        });
    }

    assert_eq!(
        dispositions,
        vec![
            "Dispatched",
            "Dispatched",
            "Dispatched",
            "failed to parse line",
            "Dropped(Mapping)",
            "Dispatched",
            "Dropped(StrictNoMatch)",
            "Dispatched",
            "Dispatched",
            "Dispatched",
        ]
    );

    assert_eq!(
        scrape(&collector).await,
        vec![
            "my_mapped_strict_metric 55",
            "my_nomap_metric 9001",
            r#"my_simple_metric{baz="bat"} 9002"#,
            r#"my_simple_metric{foo="bar", zip="zot", name="alabel"} 9001"#,
            r#"my_simple_metric_with_tags{tag1="value1", tag2="value2"} 9002"#,
            r#"my_simple_metric_with_tags{tag1="value3", tag2="value4"} 9002"#,
        ]
    );

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.invalid_lines, 1);
    // Only the tagged sample with deviating label keys was rejected by the collector.
    assert_eq!(snapshot.tag_errors, 1);
    assert!(snapshot.last_processed.is_some());
}

#[tokio::test]
async fn test_last_value_wins() {
    let stats = Arc::new(IngestStats::new());
    let collector = start_collector(&stats);
    let pipeline = LinePipeline::new(Arc::new(NoopMapper), collector.clone(), stats);

    let payload = "\
        requests;route=index 1 1534620625\n\
        requests;route=index 2 1534620626\n\
        requests;route=login 7 1534620626\n";

    let summary = pipeline.process_payload(payload).await.unwrap();
    assert_eq!(summary.dispatched, 3);

    assert_eq!(
        scrape(&collector).await,
        vec![
            r#"requests{route="index"} 2"#,
            r#"requests{route="login"} 7"#,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let stats = Arc::new(IngestStats::new());
    let collector = start_collector(&stats);
    let pipeline = LinePipeline::new(Arc::new(NoopMapper), collector.clone(), stats.clone());

    let producers: Vec<_> = (0..8)
        .map(|producer| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    let line = format!("conn.lines;producer=p{producer};seq=s{i} {i}");
                    pipeline.process_line(&line).await.unwrap();
                    pipeline.process_line("conn.broken").await.unwrap_err();
                }
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }

    collector.request(Flush).await.unwrap();
    let samples = collector.request(Scrape).await.unwrap();
    assert_eq!(samples.len(), 800);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.invalid_lines, 800);
    assert_eq!(snapshot.tag_errors, 0);
}

#[test]
fn test_blocking_producers() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let stats = Arc::new(IngestStats::new());
    let collector = runtime.block_on(async { start_collector(&stats) });

    let mut mapper = carbon_metrics::StaticMapper::new();
    mapper.insert("legacy.metric", MappingResult::dropped());
    mapper.insert(
        "udp.metric",
        MappingResult::keep("udp_metric", Labels::from_iter([("source", "udp")])),
    );
    let pipeline = LinePipeline::new(Arc::new(mapper), collector.clone(), stats.clone())
        .strict_match(true);

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || {
                let dispatched = pipeline.process_line_blocking("udp.metric 1").unwrap();
                let dropped = pipeline.process_line_blocking("legacy.metric 1").unwrap();
                let strict = pipeline.process_line_blocking("other.metric 1").unwrap();
                (dispatched, dropped, strict)
            })
        })
        .collect();

    for thread in threads {
        assert_eq!(
            thread.join().unwrap(),
            (
                Disposition::Dispatched,
                Disposition::Dropped(DropReason::Mapping),
                Disposition::Dropped(DropReason::StrictNoMatch),
            )
        );
    }

    let scraped = runtime.block_on(scrape(&collector));
    assert_eq!(scraped, vec![r#"udp_metric{source="udp"} 1"#]);

    drop(pipeline);
    drop(collector);
    runtime.block_on(async {
        // Producers observe the collector shutting down once every address is gone.
        let (addr, rx) = carbon_system::channel::<Collector>("closed", 1);
        drop(rx);
        let pipeline = LinePipeline::new(Arc::new(NoopMapper), addr, stats);
        assert!(matches!(
            pipeline.process_line("foo 1").await,
            Err(LineError::Closed(_))
        ));
    });
}
