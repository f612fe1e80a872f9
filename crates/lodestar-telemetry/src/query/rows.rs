//! Reading stored rows back into records.
//!
//! Reads happen in two phases: columns are copied out of the DuckDB row as
//! plain values while the statement is live, then JSON blobs and list
//! columns are decoded once the statement is done.

use duckdb::{Connection, Row};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::model::{
    LogRecordView, MetricRecordView, MetricValue, SpanEvent, SpanLink, SpanRecord,
};
use crate::ingest::attributes::{decode_attribute_list, decode_attributes};
use crate::ingest::MetricShape;
use crate::storage::ensure_active;
use crate::TelemetryError;

/// Run a select and map every row, checking the token between rows.
pub(crate) fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    params: &[duckdb::types::Value],
    table: &str,
    cancel: &CancellationToken,
    mut map: impl FnMut(&Row<'_>) -> duckdb::Result<T>,
) -> Result<Vec<T>, TelemetryError> {
    ensure_active(cancel)?;
    let mut stmt = conn
        .prepare(sql)
        .map_err(TelemetryError::storage("prepare select", table))?;
    let mut rows = stmt
        .query(duckdb::params_from_iter(params.iter()))
        .map_err(TelemetryError::storage("select", table))?;

    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(TelemetryError::storage("select", table))?
    {
        ensure_active(cancel)?;
        out.push(map(row).map_err(TelemetryError::storage("read row", table))?);
    }
    Ok(out)
}

fn decode_list<T: DeserializeOwned>(blob: &str) -> Result<Vec<T>, TelemetryError> {
    if blob.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(blob).map_err(|source| TelemetryError::JsonDecode { source })
}

/// Parse a `DOUBLE[]` column read back as text, e.g. `[0.5, nan, inf]`.
///
/// NULL elements decode as NaN.
fn decode_double_list(column: &'static str, text: &str) -> Result<Vec<f64>, TelemetryError> {
    let invalid = || TelemetryError::ListDecode {
        column,
        value: text.to_owned(),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(invalid)?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split(',')
        .map(str::trim)
        .map(|item| {
            if item.eq_ignore_ascii_case("null") {
                Ok(f64::NAN)
            } else {
                item.parse::<f64>().map_err(|_| invalid())
            }
        })
        .collect()
}

// ============================================================================
// Spans
// ============================================================================

/// Span columns as stored.
#[derive(Debug)]
pub(crate) struct RawSpan {
    timestamp: u64,
    trace_id: String,
    span_id: String,
    parent_span_id: String,
    trace_state: String,
    span_name: String,
    span_kind: String,
    service_name: String,
    resource_schema_url: String,
    resource_attributes: String,
    scope_name: String,
    scope_version: String,
    scope_attributes: String,
    span_attributes: String,
    duration: u64,
    status_code: String,
    status_message: String,
    events_timestamp: String,
    events_name: String,
    events_attributes: String,
    links_trace_id: String,
    links_span_id: String,
    links_trace_state: String,
    links_attributes: String,
}

impl RawSpan {
    pub(crate) fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            timestamp: row.get("timestamp")?,
            trace_id: row.get("trace_id")?,
            span_id: row.get("span_id")?,
            parent_span_id: row.get("parent_span_id")?,
            trace_state: row.get("trace_state")?,
            span_name: row.get("span_name")?,
            span_kind: row.get("span_kind")?,
            service_name: row.get("service_name")?,
            resource_schema_url: row.get("resource_schema_url")?,
            resource_attributes: row.get("resource_attributes")?,
            scope_name: row.get("scope_name")?,
            scope_version: row.get("scope_version")?,
            scope_attributes: row.get("scope_attributes")?,
            span_attributes: row.get("span_attributes")?,
            duration: row.get("duration")?,
            status_code: row.get("status_code")?,
            status_message: row.get("status_message")?,
            events_timestamp: row.get("events_timestamp")?,
            events_name: row.get("events_name")?,
            events_attributes: row.get("events_attributes")?,
            links_trace_id: row.get("links_trace_id")?,
            links_span_id: row.get("links_span_id")?,
            links_trace_state: row.get("links_trace_state")?,
            links_attributes: row.get("links_attributes")?,
        })
    }

    pub(crate) fn decode(self) -> Result<SpanRecord, TelemetryError> {
        let events_timestamp: Vec<u64> = decode_list(&self.events_timestamp)?;
        let events_name: Vec<String> = decode_list(&self.events_name)?;
        let mut events_attributes = decode_attribute_list(&self.events_attributes)?.into_iter();
        let events = events_timestamp
            .into_iter()
            .zip(events_name)
            .map(|(timestamp, name)| SpanEvent {
                timestamp,
                name,
                attributes: events_attributes.next().unwrap_or_default(),
            })
            .collect();

        let links_trace_id: Vec<String> = decode_list(&self.links_trace_id)?;
        let links_span_id: Vec<String> = decode_list(&self.links_span_id)?;
        let links_trace_state: Vec<String> = decode_list(&self.links_trace_state)?;
        let mut links_attributes = decode_attribute_list(&self.links_attributes)?.into_iter();
        let mut trace_states = links_trace_state.into_iter();
        let links = links_trace_id
            .into_iter()
            .zip(links_span_id)
            .map(|(trace_id, span_id)| SpanLink {
                trace_id,
                span_id,
                trace_state: trace_states.next().unwrap_or_default(),
                attributes: links_attributes.next().unwrap_or_default(),
            })
            .collect();

        Ok(SpanRecord {
            timestamp: self.timestamp,
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            trace_state: self.trace_state,
            name: self.span_name,
            kind: self.span_kind,
            service_name: self.service_name,
            resource_schema_url: self.resource_schema_url,
            resource_attributes: decode_attributes(&self.resource_attributes)?,
            scope_name: self.scope_name,
            scope_version: self.scope_version,
            scope_attributes: decode_attributes(&self.scope_attributes)?,
            attributes: decode_attributes(&self.span_attributes)?,
            duration: self.duration,
            status_code: self.status_code,
            status_message: self.status_message,
            events,
            links,
        })
    }
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Debug)]
pub(crate) struct RawLog {
    timestamp: u64,
    trace_id: String,
    span_id: String,
    trace_flags: u32,
    severity_text: String,
    severity_number: i32,
    service_name: String,
    body: String,
    resource_schema_url: String,
    resource_attributes: String,
    scope_schema_url: String,
    scope_name: String,
    scope_version: String,
    scope_attributes: String,
    log_attributes: String,
}

impl RawLog {
    pub(crate) fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            timestamp: row.get("timestamp")?,
            trace_id: row.get("trace_id")?,
            span_id: row.get("span_id")?,
            trace_flags: row.get("trace_flags")?,
            severity_text: row.get("severity_text")?,
            severity_number: row.get("severity_number")?,
            service_name: row.get("service_name")?,
            body: row.get("body")?,
            resource_schema_url: row.get("resource_schema_url")?,
            resource_attributes: row.get("resource_attributes")?,
            scope_schema_url: row.get("scope_schema_url")?,
            scope_name: row.get("scope_name")?,
            scope_version: row.get("scope_version")?,
            scope_attributes: row.get("scope_attributes")?,
            log_attributes: row.get("log_attributes")?,
        })
    }

    pub(crate) fn decode(self) -> Result<LogRecordView, TelemetryError> {
        Ok(LogRecordView {
            timestamp: self.timestamp,
            trace_id: self.trace_id,
            span_id: self.span_id,
            trace_flags: self.trace_flags,
            severity_text: self.severity_text,
            severity_number: self.severity_number,
            service_name: self.service_name,
            body: self.body,
            resource_schema_url: self.resource_schema_url,
            resource_attributes: decode_attributes(&self.resource_attributes)?,
            scope_schema_url: self.scope_schema_url,
            scope_name: self.scope_name,
            scope_version: self.scope_version,
            scope_attributes: decode_attributes(&self.scope_attributes)?,
            attributes: decode_attributes(&self.log_attributes)?,
        })
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug)]
pub(crate) struct RawMetric {
    timestamp: u64,
    start_timestamp: u64,
    service_name: String,
    metric_name: String,
    metric_description: String,
    metric_unit: String,
    resource_schema_url: String,
    resource_attributes: String,
    scope_schema_url: String,
    scope_name: String,
    scope_version: String,
    attributes: String,
    flags: u32,
    payload: RawPayload,
}

/// Shape payload with list columns still encoded.
#[derive(Debug)]
enum RawPayload {
    Gauge {
        value: f64,
    },
    Sum {
        value: f64,
        aggregation_temporality: i32,
        is_monotonic: bool,
    },
    Histogram {
        count: u64,
        sum: Option<f64>,
        bucket_counts: String,
        explicit_bounds: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    ExponentialHistogram {
        count: u64,
        sum: Option<f64>,
        scale: i32,
        zero_count: u64,
        zero_threshold: f64,
        positive_offset: i32,
        positive_bucket_counts: String,
        negative_offset: i32,
        negative_bucket_counts: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    Summary {
        count: u64,
        sum: f64,
        quantiles: String,
        quantile_values: String,
    },
}

impl RawPayload {
    fn from_row(shape: MetricShape, row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(match shape {
            MetricShape::Gauge => Self::Gauge {
                value: row.get("value")?,
            },
            MetricShape::Sum => Self::Sum {
                value: row.get("value")?,
                aggregation_temporality: row.get("aggregation_temporality")?,
                is_monotonic: row.get("is_monotonic")?,
            },
            MetricShape::Histogram => Self::Histogram {
                count: row.get("count")?,
                sum: row.get("sum")?,
                bucket_counts: row.get("bucket_counts")?,
                explicit_bounds: row.get("explicit_bounds")?,
                min: row.get("min")?,
                max: row.get("max")?,
            },
            MetricShape::ExponentialHistogram => Self::ExponentialHistogram {
                count: row.get("count")?,
                sum: row.get("sum")?,
                scale: row.get("scale")?,
                zero_count: row.get("zero_count")?,
                zero_threshold: row.get("zero_threshold")?,
                positive_offset: row.get("positive_offset")?,
                positive_bucket_counts: row.get("positive_bucket_counts")?,
                negative_offset: row.get("negative_offset")?,
                negative_bucket_counts: row.get("negative_bucket_counts")?,
                min: row.get("min")?,
                max: row.get("max")?,
            },
            MetricShape::Summary => Self::Summary {
                count: row.get("count")?,
                sum: row.get("sum")?,
                quantiles: row.get("quantiles")?,
                quantile_values: row.get("quantile_values")?,
            },
        })
    }

    fn decode(self) -> Result<MetricValue, TelemetryError> {
        Ok(match self {
            Self::Gauge { value } => MetricValue::Gauge { value },
            Self::Sum {
                value,
                aggregation_temporality,
                is_monotonic,
            } => MetricValue::Sum {
                value,
                aggregation_temporality,
                is_monotonic,
            },
            Self::Histogram {
                count,
                sum,
                bucket_counts,
                explicit_bounds,
                min,
                max,
            } => MetricValue::Histogram {
                count,
                sum,
                bucket_counts: decode_list(&bucket_counts)?,
                explicit_bounds: decode_double_list("explicit_bounds", &explicit_bounds)?,
                min,
                max,
            },
            Self::ExponentialHistogram {
                count,
                sum,
                scale,
                zero_count,
                zero_threshold,
                positive_offset,
                positive_bucket_counts,
                negative_offset,
                negative_bucket_counts,
                min,
                max,
            } => MetricValue::ExponentialHistogram {
                count,
                sum,
                scale,
                zero_count,
                zero_threshold,
                positive_offset,
                positive_bucket_counts: decode_list(&positive_bucket_counts)?,
                negative_offset,
                negative_bucket_counts: decode_list(&negative_bucket_counts)?,
                min,
                max,
            },
            Self::Summary {
                count,
                sum,
                quantiles,
                quantile_values,
            } => MetricValue::Summary {
                count,
                sum,
                quantiles: decode_double_list("quantiles", &quantiles)?,
                quantile_values: decode_double_list("quantile_values", &quantile_values)?,
            },
        })
    }
}

impl RawMetric {
    pub(crate) fn from_row(shape: MetricShape, row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            timestamp: row.get("timestamp")?,
            start_timestamp: row.get("start_timestamp")?,
            service_name: row.get("service_name")?,
            metric_name: row.get("metric_name")?,
            metric_description: row.get("metric_description")?,
            metric_unit: row.get("metric_unit")?,
            resource_schema_url: row.get("resource_schema_url")?,
            resource_attributes: row.get("resource_attributes")?,
            scope_schema_url: row.get("scope_schema_url")?,
            scope_name: row.get("scope_name")?,
            scope_version: row.get("scope_version")?,
            attributes: row.get("attributes")?,
            flags: row.get("flags")?,
            payload: RawPayload::from_row(shape, row)?,
        })
    }

    pub(crate) fn decode(self) -> Result<MetricRecordView, TelemetryError> {
        Ok(MetricRecordView {
            timestamp: self.timestamp,
            start_timestamp: self.start_timestamp,
            service_name: self.service_name,
            metric_name: self.metric_name,
            metric_description: self.metric_description,
            metric_unit: self.metric_unit,
            resource_schema_url: self.resource_schema_url,
            resource_attributes: decode_attributes(&self.resource_attributes)?,
            scope_schema_url: self.scope_schema_url,
            scope_name: self.scope_name,
            scope_version: self.scope_version,
            attributes: decode_attributes(&self.attributes)?,
            flags: self.flags,
            value: self.payload.decode()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_decoding() {
        assert_eq!(decode_list::<u64>("[1,2,3]").unwrap(), vec![1, 2, 3]);
        assert!(decode_list::<String>("").unwrap().is_empty());
        assert!(matches!(
            decode_list::<u64>("[1,"),
            Err(TelemetryError::JsonDecode { .. })
        ));
    }

    #[test]
    fn double_list_decoding() {
        assert_eq!(
            decode_double_list("quantiles", "[0.5, 0.99]").unwrap(),
            vec![0.5, 0.99]
        );
        assert!(decode_double_list("quantiles", "[]").unwrap().is_empty());

        let values = decode_double_list("quantile_values", "[nan, inf, -inf, 1e+300]").unwrap();
        assert!(values[0].is_nan());
        assert_eq!(values[1], f64::INFINITY);
        assert_eq!(values[2], f64::NEG_INFINITY);
        assert_eq!(values[3], 1e300);

        let values = decode_double_list("quantile_values", "[NaN, Infinity, NULL]").unwrap();
        assert!(values[0].is_nan());
        assert_eq!(values[1], f64::INFINITY);
        assert!(values[2].is_nan());

        assert!(matches!(
            decode_double_list("explicit_bounds", "[0.5, abc]"),
            Err(TelemetryError::ListDecode { column: "explicit_bounds", .. })
        ));
        assert!(matches!(
            decode_double_list("explicit_bounds", "0.5"),
            Err(TelemetryError::ListDecode { .. })
        ));
    }

    #[test]
    fn span_events_zip_with_attributes() {
        let raw = RawSpan {
            timestamp: 1,
            trace_id: "t".into(),
            span_id: "s".into(),
            parent_span_id: String::new(),
            trace_state: String::new(),
            span_name: "op".into(),
            span_kind: "server".into(),
            service_name: "svc".into(),
            resource_schema_url: String::new(),
            resource_attributes: "{}".into(),
            scope_name: String::new(),
            scope_version: String::new(),
            scope_attributes: "{}".into(),
            span_attributes: r#"{"k":"v"}"#.into(),
            duration: 10,
            status_code: "ok".into(),
            status_message: String::new(),
            events_timestamp: "[100,200]".into(),
            events_name: r#"["a","b"]"#.into(),
            events_attributes: r#"[{"n":1},{"n":2}]"#.into(),
            links_trace_id: r#"["ff"]"#.into(),
            links_span_id: r#"["ee"]"#.into(),
            links_trace_state: r#"["x=y"]"#.into(),
            links_attributes: "[{}]".into(),
        };
        let span = raw.decode().unwrap();
        assert_eq!(span.attributes["k"], "v");
        assert_eq!(span.events.len(), 2);
        assert_eq!(span.events[1].timestamp, 200);
        assert_eq!(span.events[1].name, "b");
        assert_eq!(span.events[1].attributes["n"], 2);
        assert_eq!(span.links[0].span_id, "ee");
        assert_eq!(span.links[0].trace_state, "x=y");
    }

    #[test]
    fn malformed_blob_is_a_decode_error() {
        let raw = RawLog {
            timestamp: 0,
            trace_id: String::new(),
            span_id: String::new(),
            trace_flags: 0,
            severity_text: String::new(),
            severity_number: 0,
            service_name: String::new(),
            body: String::new(),
            resource_schema_url: String::new(),
            resource_attributes: "{not json".into(),
            scope_schema_url: String::new(),
            scope_name: String::new(),
            scope_version: String::new(),
            scope_attributes: "{}".into(),
            log_attributes: "{}".into(),
        };
        assert!(matches!(
            raw.decode(),
            Err(TelemetryError::JsonDecode { .. })
        ));
    }
}
