//! Metric tables, one per data shape.
//!
//! All five share a header (timing, service, metric identity and the three
//! attribute levels) followed by a shape-specific payload. See the
//! [OTel Metrics Data Model].
//!
//! [OTel Metrics Data Model]: https://opentelemetry.io/docs/specs/otel/metrics/data-model/

use super::{Column, ColumnType, ListType};

/// Columns shared by every metric table.
pub const HEADER: &[Column] = &[
    // Point time, falling back to the point's start time.
    Column::new("timestamp", ColumnType::UBigInt),
    Column::new("start_timestamp", ColumnType::UBigInt),
    Column::new("service_name", ColumnType::Varchar),
    Column::new("metric_name", ColumnType::Varchar),
    Column::new("metric_description", ColumnType::Varchar),
    Column::new("metric_unit", ColumnType::Varchar),
    Column::new("resource_schema_url", ColumnType::Varchar),
    Column::new("resource_attributes", ColumnType::Json),
    Column::new("scope_schema_url", ColumnType::Varchar),
    Column::new("scope_name", ColumnType::Varchar),
    Column::new("scope_version", ColumnType::Varchar),
    Column::new("attributes", ColumnType::Json),
    Column::new("flags", ColumnType::UInteger),
];

pub const GAUGE: &[Column] = &[Column::new("value", ColumnType::Double)];

pub const SUM: &[Column] = &[
    Column::new("value", ColumnType::Double),
    Column::new("aggregation_temporality", ColumnType::Integer),
    Column::new("is_monotonic", ColumnType::Boolean),
];

pub const HISTOGRAM: &[Column] = &[
    Column::new("count", ColumnType::UBigInt),
    Column::new("sum", ColumnType::Double),
    Column::new("bucket_counts", ColumnType::List(ListType::UBigInt)),
    Column::new("explicit_bounds", ColumnType::List(ListType::Double)),
    Column::new("min", ColumnType::Double),
    Column::new("max", ColumnType::Double),
];

pub const EXPONENTIAL_HISTOGRAM: &[Column] = &[
    Column::new("count", ColumnType::UBigInt),
    Column::new("sum", ColumnType::Double),
    Column::new("scale", ColumnType::Integer),
    Column::new("zero_count", ColumnType::UBigInt),
    Column::new("zero_threshold", ColumnType::Double),
    Column::new("positive_offset", ColumnType::Integer),
    Column::new("positive_bucket_counts", ColumnType::List(ListType::UBigInt)),
    Column::new("negative_offset", ColumnType::Integer),
    Column::new("negative_bucket_counts", ColumnType::List(ListType::UBigInt)),
    Column::new("min", ColumnType::Double),
    Column::new("max", ColumnType::Double),
];

pub const SUMMARY: &[Column] = &[
    Column::new("count", ColumnType::UBigInt),
    Column::new("sum", ColumnType::Double),
    Column::new("quantiles", ColumnType::List(ListType::Double)),
    Column::new("quantile_values", ColumnType::List(ListType::Double)),
];

/// Header followed by a shape payload.
pub fn columns(payload: &[Column]) -> Vec<Column> {
    HEADER.iter().chain(payload).copied().collect()
}
