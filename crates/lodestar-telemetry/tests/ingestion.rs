//! Integration tests for the OTLP ingestion pipeline.
//!
//! Tests the full flow: OTLP request -> flattened rows -> DuckDB -> read back

use opentelemetry_proto::tonic::collector::{
    logs::v1::ExportLogsServiceRequest, metrics::v1::ExportMetricsServiceRequest,
    trace::v1::ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    exponential_histogram_data_point::Buckets, metric, number_data_point,
    summary_data_point::ValueAtQuantile, ExponentialHistogram, ExponentialHistogramDataPoint,
    Gauge, Histogram, HistogramDataPoint, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics,
    Sum, Summary, SummaryDataPoint,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, ResourceSpans, ScopeSpans, Span};
use serde_json::json;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use lodestar_telemetry::config::StorageConfig;
use lodestar_telemetry::query::{MetricValue, RefType, TagType, TraceQuery};
use lodestar_telemetry::{ErrorKind, MetricShape, Storage, TelemetryConfig, TelemetryError};

const START: u64 = 1_704_067_200_000_000_000;

// ============================================================================
// Fixtures
// ============================================================================

#[fixture]
fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create temp directory")
}

#[fixture]
fn memory_config() -> TelemetryConfig {
    TelemetryConfig::in_memory()
}

fn file_config(dir: &TempDir) -> TelemetryConfig {
    TelemetryConfig {
        storage: StorageConfig::Local {
            path: dir.path().join("telemetry.duckdb"),
        },
        ..TelemetryConfig::default()
    }
}

fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

fn resource(service: Option<&str>) -> Resource {
    Resource {
        attributes: service
            .map(|s| vec![string_kv("service.name", s)])
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn span(trace: u8, id: u8, name: &str) -> Span {
    Span {
        trace_id: vec![trace; 16],
        span_id: vec![id; 8],
        name: name.to_string(),
        start_time_unix_nano: START,
        end_time_unix_nano: START + 1_000_000,
        attributes: vec![string_kv("http.method", "GET")],
        ..Default::default()
    }
}

fn traces(service: Option<&str>, spans: Vec<Span>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource(service)),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn metrics(metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource(Some("api"))),
            scope_metrics: vec![ScopeMetrics {
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn point(value: f64) -> NumberDataPoint {
    NumberDataPoint {
        time_unix_nano: START,
        value: Some(number_data_point::Value::AsDouble(value)),
        ..Default::default()
    }
}

fn gauge(name: &str) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(metric::Data::Gauge(Gauge {
            data_points: vec![point(0.5)],
        })),
        ..Default::default()
    }
}

fn sum(name: &str) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(metric::Data::Sum(Sum {
            data_points: vec![point(3.0)],
            aggregation_temporality: 2,
            is_monotonic: true,
        })),
        ..Default::default()
    }
}

fn histogram(name: &str) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(metric::Data::Histogram(Histogram {
            data_points: vec![HistogramDataPoint {
                time_unix_nano: START,
                count: 3,
                sum: Some(0.6),
                bucket_counts: vec![1, 2, 0],
                explicit_bounds: vec![0.1, 0.5],
                min: Some(0.1),
                max: Some(0.3),
                ..Default::default()
            }],
            aggregation_temporality: 2,
        })),
        ..Default::default()
    }
}

fn int_kv(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::IntValue(value)),
        }),
    }
}

fn exponential_histogram(name: &str) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(metric::Data::ExponentialHistogram(ExponentialHistogram {
            data_points: vec![ExponentialHistogramDataPoint {
                time_unix_nano: START,
                count: 6,
                sum: Some(12.5),
                scale: 3,
                zero_count: 1,
                zero_threshold: 0.001,
                positive: Some(Buckets {
                    offset: 2,
                    bucket_counts: vec![1, 3],
                }),
                negative: Some(Buckets {
                    offset: -1,
                    bucket_counts: vec![1],
                }),
                min: Some(-0.5),
                max: Some(4.0),
                ..Default::default()
            }],
            aggregation_temporality: 1,
        })),
        ..Default::default()
    }
}

fn summary(name: &str, quantiles: &[(f64, f64)]) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(metric::Data::Summary(Summary {
            data_points: vec![SummaryDataPoint {
                time_unix_nano: START,
                count: 10,
                sum: 4.5,
                quantile_values: quantiles
                    .iter()
                    .map(|&(quantile, value)| ValueAtQuantile { quantile, value })
                    .collect(),
                ..Default::default()
            }],
        })),
        ..Default::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[rstest]
#[tokio::test]
async fn traces_round_trip(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    let summary = storage
        .ingest_traces(
            &traces(Some("api"), vec![span(7, 1, "GET /"), span(7, 2, "SELECT")]),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(summary.rows, 2);

    let trace = storage.get_trace(&"07".repeat(16), &cancel).await.unwrap();
    assert_eq!(trace.spans.len(), 2);
    let tag = trace.spans[0]
        .tags
        .iter()
        .find(|t| t.key == "http.method")
        .unwrap();
    assert_eq!(tag.value, "GET");
    assert_eq!(trace.spans[0].duration, 1_000);
}

#[rstest]
#[tokio::test]
async fn logs_keep_body_and_attributes(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    let request = ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Some(resource(Some("worker"))),
            scope_logs: vec![ScopeLogs {
                log_records: vec![LogRecord {
                    observed_time_unix_nano: START,
                    trace_id: vec![9; 16],
                    span_id: vec![8; 8],
                    body: Some(AnyValue {
                        value: Some(any_value::Value::IntValue(42)),
                    }),
                    attributes: vec![string_kv("job", "reindex")],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    };
    storage.ingest_logs(&request, &cancel).await.unwrap();

    let logs = storage.recent_logs(&cancel).await.unwrap();
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.timestamp, START);
    assert_eq!(log.body, "42");
    assert_eq!(log.trace_id, "09".repeat(16));
    assert_eq!(log.span_id, "08".repeat(8));
    assert_eq!(log.attributes["job"], "reindex");
    assert_eq!(log.service_name, "worker");
}

#[rstest]
#[tokio::test]
async fn reopening_a_file_keeps_data(temp_dir: TempDir) {
    let config = file_config(&temp_dir);
    let cancel = CancellationToken::new();

    let storage = Storage::open(&config).await.unwrap();
    storage
        .ingest_traces(&traces(Some("api"), vec![span(1, 1, "GET /")]), &cancel)
        .await
        .unwrap();
    storage.close().unwrap();

    let storage = Storage::open(&config).await.unwrap();
    let services = storage.list_services(&cancel).await.unwrap();
    assert_eq!(services, vec!["api".to_string()]);
    assert_eq!(storage.recent_spans(&cancel).await.unwrap().len(), 1);
    storage.close().unwrap();
}

#[rstest]
#[tokio::test]
async fn missing_service_name_is_empty(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    storage
        .ingest_traces(&traces(None, vec![span(2, 1, "anonymous")]), &cancel)
        .await
        .unwrap();

    assert_eq!(
        storage.list_services(&cancel).await.unwrap(),
        vec![String::new()]
    );
    let spans = storage.recent_spans(&cancel).await.unwrap();
    assert_eq!(spans[0].service_name, "");
}

#[rstest]
#[tokio::test]
async fn unset_metric_type_rejects_payload(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    let unset = Metric {
        name: "mystery".to_string(),
        data: None,
        ..Default::default()
    };
    let err = storage
        .ingest_metrics(&metrics(vec![gauge("cpu"), unset]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TelemetryError::UnsetMetricType { ref metric } if metric == "mystery"));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    let gauges = storage
        .recent_metrics(MetricShape::Gauge, &cancel)
        .await
        .unwrap();
    assert!(gauges.is_empty());
}

#[rstest]
#[tokio::test]
async fn failing_metric_table_does_not_block_the_others(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    storage
        .connection()
        .unwrap()
        .execute_batch("DROP TABLE otel_metrics_sum")
        .unwrap();

    let err = storage
        .ingest_metrics(
            &metrics(vec![gauge("cpu"), sum("requests"), histogram("latency")]),
            &cancel,
        )
        .await
        .unwrap_err();

    let TelemetryError::MetricsCommit(commit) = &err else {
        panic!("expected joined metrics error, got {err:?}");
    };
    assert_eq!(commit.failures().len(), 1);
    assert_eq!(commit.failed_tables(), vec!["otel_metrics_sum"]);
    assert!(err.to_string().contains("otel_metrics_sum"));
    assert_eq!(err.kind(), ErrorKind::Storage);

    let gauges = storage
        .recent_metrics(MetricShape::Gauge, &cancel)
        .await
        .unwrap();
    assert_eq!(gauges.len(), 1);

    let histograms = storage
        .recent_metrics(MetricShape::Histogram, &cancel)
        .await
        .unwrap();
    assert_eq!(histograms.len(), 1);
    match &histograms[0].value {
        MetricValue::Histogram {
            count,
            bucket_counts,
            explicit_bounds,
            ..
        } => {
            assert_eq!(*count, 3);
            assert_eq!(bucket_counts, &vec![1, 2, 0]);
            assert_eq!(explicit_bounds, &vec![0.1, 0.5]);
        }
        other => panic!("unexpected value {other:?}"),
    }
}

#[rstest]
#[tokio::test]
async fn cancelled_token_stops_reads_and_writes(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = storage
        .ingest_metrics(&metrics(vec![gauge("cpu")]), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    let err = storage
        .search_traces(&TraceQuery::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::Cancelled));

    let live = CancellationToken::new();
    let gauges = storage
        .recent_metrics(MetricShape::Gauge, &live)
        .await
        .unwrap();
    assert!(gauges.is_empty());
}

#[rstest]
#[tokio::test]
async fn span_events_and_links_round_trip(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    let mut traced = span(4, 2, "consume");
    traced.parent_span_id = vec![1; 8];
    traced.events = vec![
        span::Event {
            time_unix_nano: START + 5_000,
            name: "retry".to_string(),
            attributes: vec![int_kv("attempt", 2)],
            ..Default::default()
        },
        span::Event {
            time_unix_nano: START + 9_000,
            name: "done".to_string(),
            ..Default::default()
        },
    ];
    traced.links = vec![
        span::Link {
            trace_id: vec![6; 16],
            span_id: vec![3; 8],
            trace_state: "vendor=a".to_string(),
            attributes: vec![string_kv("link.kind", "batch")],
            ..Default::default()
        },
        // Duplicates the parent and is not repeated as a reference.
        span::Link {
            trace_id: vec![4; 16],
            span_id: vec![1; 8],
            ..Default::default()
        },
    ];
    storage
        .ingest_traces(&traces(Some("queue"), vec![traced]), &cancel)
        .await
        .unwrap();

    let records = storage.recent_spans(&cancel).await.unwrap();
    let record = &records[0];
    assert_eq!(record.events.len(), 2);
    assert_eq!(record.events[0].name, "retry");
    assert_eq!(record.events[0].timestamp, START + 5_000);
    assert_eq!(record.events[0].attributes["attempt"], json!(2));
    assert!(record.events[1].attributes.is_empty());
    assert_eq!(record.links.len(), 2);
    assert_eq!(record.links[0].trace_id, "06".repeat(16));
    assert_eq!(record.links[0].span_id, "03".repeat(8));
    assert_eq!(record.links[0].trace_state, "vendor=a");
    assert_eq!(record.links[0].attributes["link.kind"], "batch");

    let trace = storage.get_trace(&"04".repeat(16), &cancel).await.unwrap();
    let view = &trace.spans[0];
    assert_eq!(view.references.len(), 2);
    assert_eq!(view.references[0].ref_type, RefType::ChildOf);
    assert_eq!(view.references[0].span_id, "01".repeat(8));
    assert_eq!(view.references[1].ref_type, RefType::FollowsFrom);
    assert_eq!(view.references[1].trace_id, "06".repeat(16));
    assert_eq!(view.references[1].span_id, "03".repeat(8));

    assert_eq!(view.logs.len(), 2);
    assert_eq!(view.logs[0].timestamp, (START + 5_000) / 1_000);
    let fields: Vec<_> = view.logs[0]
        .fields
        .iter()
        .map(|f| (f.key.as_str(), f.kind, f.value.clone()))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("event", TagType::String, json!("retry")),
            ("attempt", TagType::Int64, json!(2)),
        ]
    );
    assert_eq!(view.logs[1].fields.len(), 1);
    assert_eq!(view.logs[1].fields[0].value, json!("done"));
}

#[rstest]
#[tokio::test]
async fn exponential_histograms_and_summaries_round_trip(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    let written = storage
        .ingest_metrics(
            &metrics(vec![
                exponential_histogram("payload.size"),
                summary("rpc.latency", &[(0.5, 0.25), (0.99, 1.75)]),
            ]),
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(written.rows, 2);

    let exponential = storage
        .recent_metrics(MetricShape::ExponentialHistogram, &cancel)
        .await
        .unwrap();
    assert_eq!(exponential.len(), 1);
    assert_eq!(exponential[0].metric_name, "payload.size");
    assert_eq!(
        exponential[0].value,
        MetricValue::ExponentialHistogram {
            count: 6,
            sum: Some(12.5),
            scale: 3,
            zero_count: 1,
            zero_threshold: 0.001,
            positive_offset: 2,
            positive_bucket_counts: vec![1, 3],
            negative_offset: -1,
            negative_bucket_counts: vec![1],
            min: Some(-0.5),
            max: Some(4.0),
        }
    );

    let summaries = storage
        .recent_metrics(MetricShape::Summary, &cancel)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(
        summaries[0].value,
        MetricValue::Summary {
            count: 10,
            sum: 4.5,
            quantiles: vec![0.5, 0.99],
            quantile_values: vec![0.25, 1.75],
        }
    );
}

#[rstest]
#[tokio::test]
async fn non_finite_metric_values_survive_round_trip(memory_config: TelemetryConfig) {
    let storage = Storage::open(&memory_config).await.unwrap();
    let cancel = CancellationToken::new();

    let mut unbounded = histogram("latency");
    if let Some(metric::Data::Histogram(h)) = &mut unbounded.data {
        h.data_points[0].explicit_bounds = vec![0.1, f64::INFINITY];
    }
    storage
        .ingest_metrics(
            &metrics(vec![
                summary("gc.pause", &[(0.5, f64::NAN), (1.0, f64::NEG_INFINITY)]),
                unbounded,
            ]),
            &cancel,
        )
        .await
        .unwrap();

    let summaries = storage
        .recent_metrics(MetricShape::Summary, &cancel)
        .await
        .unwrap();
    match &summaries[0].value {
        MetricValue::Summary {
            quantiles,
            quantile_values,
            ..
        } => {
            assert_eq!(quantiles, &vec![0.5, 1.0]);
            assert_eq!(quantile_values.len(), 2);
            assert!(quantile_values[0].is_nan());
            assert_eq!(quantile_values[1], f64::NEG_INFINITY);
        }
        other => panic!("unexpected value {other:?}"),
    }

    let histograms = storage
        .recent_metrics(MetricShape::Histogram, &cancel)
        .await
        .unwrap();
    match &histograms[0].value {
        MetricValue::Histogram {
            explicit_bounds, ..
        } => assert_eq!(explicit_bounds, &vec![0.1, f64::INFINITY]),
        other => panic!("unexpected value {other:?}"),
    }
}
