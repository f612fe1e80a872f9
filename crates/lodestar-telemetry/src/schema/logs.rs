//! Log record table.
//!
//! Follows the [OTel Logs Data Model]: one row per log record with the
//! resource, scope and record attribute maps kept as separate JSON columns.
//!
//! [OTel Logs Data Model]: https://opentelemetry.io/docs/specs/otel/logs/data-model/

use super::{Column, ColumnType};

/// Log table columns, in insertion order.
pub const COLUMNS: &[Column] = &[
    // Effective timestamp: time_unix_nano, falling back to observed time.
    Column::new("timestamp", ColumnType::UBigInt),
    Column::new("trace_id", ColumnType::Varchar),
    Column::new("span_id", ColumnType::Varchar),
    Column::new("trace_flags", ColumnType::UInteger),
    Column::new("severity_text", ColumnType::Varchar),
    Column::new("severity_number", ColumnType::Integer),
    Column::new("service_name", ColumnType::Varchar),
    Column::new("body", ColumnType::Varchar),
    Column::new("resource_schema_url", ColumnType::Varchar),
    Column::new("resource_attributes", ColumnType::Json),
    Column::new("scope_schema_url", ColumnType::Varchar),
    Column::new("scope_name", ColumnType::Varchar),
    Column::new("scope_version", ColumnType::Varchar),
    Column::new("scope_attributes", ColumnType::Json),
    Column::new("log_attributes", ColumnType::Json),
];
