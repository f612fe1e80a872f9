//! Composable test fixtures using rstest.
//!
//! ```text
//! temp_dir
//!    └── file_config ──┐
//! memory_config ───────┴── Storage::open(..).await
//! ```
//!
//! Request builders produce small OTLP payloads with a known service name.
//!
//! # Example
//!
//! ```ignore
//! use rstest::*;
//! use crate::test_fixtures::*;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn my_test(memory_config: TelemetryConfig) {
//!     let storage = Storage::open(&memory_config).await.unwrap();
//!     storage
//!         .ingest_traces(&traces_request("api", vec![span(1, 1, 0, "GET /")]), &cancel())
//!         .await
//!         .unwrap();
//! }
//! ```

use opentelemetry_proto::tonic::collector::{
    logs::v1::ExportLogsServiceRequest, metrics::v1::ExportMetricsServiceRequest,
    trace::v1::ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, number_data_point, Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span, ResourceSpans, ScopeSpans, Span};
use rstest::fixture;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::{StorageConfig, TelemetryConfig};

/// Base span start used by the builders: 2024-01-01T00:00:00Z.
pub const BASE_TIME_NANOS: u64 = 1_704_067_200_000_000_000;

/// A temporary directory that auto-cleans on drop.
#[fixture]
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("failed to create temp directory")
}

/// In-memory database config.
#[fixture]
pub fn memory_config() -> TelemetryConfig {
    init_tracing();
    TelemetryConfig::in_memory()
}

/// Local database file inside a temp directory.
#[fixture]
pub fn file_config(temp_dir: TempDir) -> (TelemetryConfig, TempDir) {
    init_tracing();
    let config = TelemetryConfig {
        storage: StorageConfig::Local {
            path: temp_dir.path().join("data").join("telemetry.duckdb"),
        },
        ..TelemetryConfig::default()
    };
    (config, temp_dir)
}

/// A token that is never cancelled.
pub fn cancel() -> CancellationToken {
    CancellationToken::new()
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.to_string())),
        }),
    }
}

pub fn service_resource(service: &str) -> Resource {
    Resource {
        attributes: vec![string_kv("service.name", service)],
        ..Default::default()
    }
}

/// Span with ids derived from small integers. A zero parent means root.
pub fn span(trace: u8, id: u8, parent: u8, name: &str) -> Span {
    Span {
        trace_id: vec![trace; 16],
        span_id: vec![id; 8],
        parent_span_id: if parent == 0 { vec![] } else { vec![parent; 8] },
        name: name.to_string(),
        kind: span::SpanKind::Server as i32,
        start_time_unix_nano: BASE_TIME_NANOS + u64::from(id) * 1_000_000,
        end_time_unix_nano: BASE_TIME_NANOS + u64::from(id) * 1_000_000 + 500_000,
        ..Default::default()
    }
}

pub fn traces_request(service: &str, spans: Vec<Span>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(service_resource(service)),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

pub fn log_record(time: u64, body: &str) -> LogRecord {
    LogRecord {
        time_unix_nano: time,
        severity_text: "INFO".to_string(),
        severity_number: 9,
        body: Some(AnyValue {
            value: Some(any_value::Value::StringValue(body.to_string())),
        }),
        ..Default::default()
    }
}

pub fn logs_request(service: &str, records: Vec<LogRecord>) -> ExportLogsServiceRequest {
    ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Some(service_resource(service)),
            scope_logs: vec![ScopeLogs {
                log_records: records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

fn number_point(time: u64, value: f64) -> NumberDataPoint {
    NumberDataPoint {
        time_unix_nano: time,
        value: Some(number_data_point::Value::AsDouble(value)),
        ..Default::default()
    }
}

pub fn gauge_metric(name: &str, values: &[f64]) -> Metric {
    Metric {
        name: name.to_string(),
        unit: "1".to_string(),
        data: Some(metric::Data::Gauge(Gauge {
            data_points: values
                .iter()
                .enumerate()
                .map(|(i, v)| number_point(BASE_TIME_NANOS + i as u64, *v))
                .collect(),
        })),
        ..Default::default()
    }
}

pub fn sum_metric(name: &str, values: &[f64]) -> Metric {
    Metric {
        name: name.to_string(),
        data: Some(metric::Data::Sum(Sum {
            data_points: values
                .iter()
                .enumerate()
                .map(|(i, v)| number_point(BASE_TIME_NANOS + i as u64, *v))
                .collect(),
            aggregation_temporality: 2,
            is_monotonic: true,
        })),
        ..Default::default()
    }
}

pub fn metrics_request(service: &str, metrics: Vec<Metric>) -> ExportMetricsServiceRequest {
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(service_resource(service)),
            scope_metrics: vec![ScopeMetrics {
                metrics,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}
