//! Query inputs and result views.
//!
//! The trace views serialise to the field names the Jaeger UI expects
//! (`traceID`, `operationName`, `processID`, ...). Record views mirror the
//! stored rows with attribute blobs decoded back into JSON maps.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ingest::MetricShape;

/// Decoded attribute map.
pub type Attributes = Map<String, Value>;

// ============================================================================
// Query inputs
// ============================================================================

/// Filters for [`Storage::search_traces`](crate::Storage::search_traces).
///
/// A trace matches when at least one of its spans passes every filter that
/// is set. With no filters every trace matches, up to the limit.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use chrono::{TimeDelta, Utc};
/// use lodestar_telemetry::query::TraceQuery;
///
/// let end = Utc::now();
/// let query = TraceQuery::new()
///     .service("checkout")
///     .operation("POST /orders")
///     .time_range(end - TimeDelta::hours(1), end)
///     .min_duration(Duration::from_millis(100))
///     .limit(50);
///
/// assert_eq!(query.limit_or(20), 50);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use = "queries do nothing until passed to search_traces"]
pub struct TraceQuery {
    pub service: Option<String>,
    pub operation: Option<String>,
    pub start_time_min: Option<DateTime<Utc>>,
    pub start_time_max: Option<DateTime<Utc>>,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
    pub limit: Option<usize>,
}

impl TraceQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by service name.
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.service = Some(name.into());
        self
    }

    /// Filter by span name (exact match).
    pub fn operation(mut self, name: impl Into<String>) -> Self {
        self.operation = Some(name.into());
        self
    }

    /// Earliest span start, inclusive.
    pub const fn start_time_min(mut self, ts: DateTime<Utc>) -> Self {
        self.start_time_min = Some(ts);
        self
    }

    /// Latest span start, inclusive.
    pub const fn start_time_max(mut self, ts: DateTime<Utc>) -> Self {
        self.start_time_max = Some(ts);
        self
    }

    /// Both start bounds at once.
    pub const fn time_range(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time_min(start).start_time_max(end)
    }

    pub const fn min_duration(mut self, duration: Duration) -> Self {
        self.min_duration = Some(duration);
        self
    }

    pub const fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Maximum number of traces returned.
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// The configured limit, or `default` when none was set.
    pub fn limit_or(&self, default: usize) -> usize {
        self.limit.unwrap_or(default)
    }
}

/// Window for [`Storage::get_dependencies`](crate::Storage::get_dependencies).
///
/// Child spans must start in `[end_time - lookback, end_time]`. Either bound
/// may be left open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[must_use]
pub struct DependencyQuery {
    pub end_time: Option<DateTime<Utc>>,
    pub lookback: Option<Duration>,
}

impl DependencyQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn end_time(mut self, ts: DateTime<Utc>) -> Self {
        self.end_time = Some(ts);
        self
    }

    pub const fn lookback(mut self, lookback: Duration) -> Self {
        self.lookback = Some(lookback);
        self
    }
}

/// Convert a UTC timestamp to Unix nanoseconds, clamped to the `u64` range.
pub fn unix_nanos(ts: DateTime<Utc>) -> u64 {
    match ts.timestamp_nanos_opt() {
        Some(nanos) => u64::try_from(nanos).unwrap_or(0),
        None if ts.timestamp() > 0 => u64::MAX,
        None => 0,
    }
}

/// Convert a duration to nanoseconds, saturating at `u64::MAX`.
pub fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

// ============================================================================
// Stored records
// ============================================================================

/// A span as read back from the traces table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpanRecord {
    /// Span start, Unix nanoseconds.
    pub timestamp: u64,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_state: String,
    pub name: String,
    pub kind: String,
    pub service_name: String,
    pub resource_schema_url: String,
    pub resource_attributes: Attributes,
    pub scope_name: String,
    pub scope_version: String,
    pub scope_attributes: Attributes,
    pub attributes: Attributes,
    /// Nanoseconds.
    pub duration: u64,
    pub status_code: String,
    pub status_message: String,
    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpanEvent {
    pub timestamp: u64,
    pub name: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    pub trace_state: String,
    pub attributes: Attributes,
}

/// A log record as read back from the logs table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogRecordView {
    pub timestamp: u64,
    pub trace_id: String,
    pub span_id: String,
    pub trace_flags: u32,
    pub severity_text: String,
    pub severity_number: i32,
    pub service_name: String,
    pub body: String,
    pub resource_schema_url: String,
    pub resource_attributes: Attributes,
    pub scope_schema_url: String,
    pub scope_name: String,
    pub scope_version: String,
    pub scope_attributes: Attributes,
    pub attributes: Attributes,
}

/// A metric data point as read back from one of the metric tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecordView {
    pub timestamp: u64,
    pub start_timestamp: u64,
    pub service_name: String,
    pub metric_name: String,
    pub metric_description: String,
    pub metric_unit: String,
    pub resource_schema_url: String,
    pub resource_attributes: Attributes,
    pub scope_schema_url: String,
    pub scope_name: String,
    pub scope_version: String,
    pub attributes: Attributes,
    pub flags: u32,
    #[serde(flatten)]
    pub value: MetricValue,
}

/// Shape-specific part of a metric point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
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
        bucket_counts: Vec<u64>,
        explicit_bounds: Vec<f64>,
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
        positive_bucket_counts: Vec<u64>,
        negative_offset: i32,
        negative_bucket_counts: Vec<u64>,
        min: Option<f64>,
        max: Option<f64>,
    },
    Summary {
        count: u64,
        sum: f64,
        quantiles: Vec<f64>,
        quantile_values: Vec<f64>,
    },
}

impl MetricValue {
    pub const fn shape(&self) -> MetricShape {
        match self {
            Self::Gauge { .. } => MetricShape::Gauge,
            Self::Sum { .. } => MetricShape::Sum,
            Self::Histogram { .. } => MetricShape::Histogram,
            Self::ExponentialHistogram { .. } => MetricShape::ExponentialHistogram,
            Self::Summary { .. } => MetricShape::Summary,
        }
    }
}

// ============================================================================
// Jaeger views
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceView {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub spans: Vec<SpanView>,
    /// Keyed by process id (`p1`, `p2`, ...).
    pub processes: BTreeMap<String, ProcessView>,
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanView {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    #[serde(rename = "operationName")]
    pub operation_name: String,
    pub references: Vec<SpanReference>,
    /// Microseconds since the Unix epoch.
    #[serde(rename = "startTime")]
    pub start_time: u64,
    /// Microseconds.
    pub duration: u64,
    pub tags: Vec<Tag>,
    pub logs: Vec<SpanLog>,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefType {
    ChildOf,
    FollowsFrom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpanReference {
    #[serde(rename = "refType")]
    pub ref_type: RefType,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TagType {
    String,
    Bool,
    Int64,
    Float64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: TagType,
    pub value: Value,
}

impl Tag {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: TagType::String,
            value: Value::String(value.into()),
        }
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            kind: TagType::Bool,
            value: Value::Bool(value),
        }
    }

    /// Tag for a decoded attribute, with the type inferred from the value.
    ///
    /// Arrays and objects are carried as their JSON text; null becomes an
    /// empty string.
    pub fn from_json(key: impl Into<String>, value: &Value) -> Self {
        let key = key.into();
        match value {
            Value::String(s) => Self::string(key, s.as_str()),
            Value::Bool(b) => Self::bool(key, *b),
            Value::Number(n) if n.is_i64() || n.is_u64() => Self {
                key,
                kind: TagType::Int64,
                value: value.clone(),
            },
            Value::Number(_) => Self {
                key,
                kind: TagType::Float64,
                value: value.clone(),
            },
            Value::Array(_) | Value::Object(_) => Self::string(key, value.to_string()),
            Value::Null => Self::string(key, ""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessView {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanLog {
    /// Microseconds since the Unix epoch.
    pub timestamp: u64,
    pub fields: Vec<Tag>,
}

/// Calls from one service to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    #[serde(rename = "callCount")]
    pub call_count: u64,
}
