//! Relational schema for telemetry signals.
//!
//! Every signal lands in its own DuckDB table: one for logs, one for spans and
//! one per metric shape. Column layouts are declared as static [`Column`]
//! slices and rendered into DDL, `INSERT` and `SELECT` statements against the
//! configured [`TableNames`], so renaming a table is a configuration change.
//!
//! # Column encoding
//!
//! - Timestamps and durations are `UBIGINT` Unix nanoseconds.
//! - Attribute maps are `JSON` objects, one per attribute level.
//! - Repeated values (span events, bucket counts, ...) are native DuckDB
//!   lists, bound and read as text so list handling stays out of parameter
//!   binding. Integer and text lists go through `from_json` / `to_json`.
//!   `DOUBLE[]` columns use DuckDB's own list literal instead, since JSON
//!   cannot carry NaN or the infinities.

use serde::Deserialize;
use std::fmt;

pub mod logs;
pub mod metrics;
pub mod traces;

// ============================================================================
// Table names
// ============================================================================

/// Configurable table name for every signal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub logs: String,
    pub traces: String,
    pub metrics_gauge: String,
    pub metrics_sum: String,
    pub metrics_histogram: String,
    pub metrics_exponential_histogram: String,
    pub metrics_summary: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            logs: "otel_logs".to_owned(),
            traces: "otel_traces".to_owned(),
            metrics_gauge: "otel_metrics_gauge".to_owned(),
            metrics_sum: "otel_metrics_sum".to_owned(),
            metrics_histogram: "otel_metrics_histogram".to_owned(),
            metrics_exponential_histogram: "otel_metrics_exponential_histogram".to_owned(),
            metrics_summary: "otel_metrics_summary".to_owned(),
        }
    }
}

/// A table in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Logs,
    Traces,
    MetricsGauge,
    MetricsSum,
    MetricsHistogram,
    MetricsExponentialHistogram,
    MetricsSummary,
}

impl Table {
    /// Every table, in creation order.
    pub const ALL: [Self; 7] = [
        Self::Logs,
        Self::Traces,
        Self::MetricsGauge,
        Self::MetricsSum,
        Self::MetricsHistogram,
        Self::MetricsExponentialHistogram,
        Self::MetricsSummary,
    ];

    /// Stable logical name, independent of configuration.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Traces => "traces",
            Self::MetricsGauge => "metrics_gauge",
            Self::MetricsSum => "metrics_sum",
            Self::MetricsHistogram => "metrics_histogram",
            Self::MetricsExponentialHistogram => "metrics_exponential_histogram",
            Self::MetricsSummary => "metrics_summary",
        }
    }

    /// Configured physical name.
    pub fn name(self, names: &TableNames) -> &str {
        match self {
            Self::Logs => &names.logs,
            Self::Traces => &names.traces,
            Self::MetricsGauge => &names.metrics_gauge,
            Self::MetricsSum => &names.metrics_sum,
            Self::MetricsHistogram => &names.metrics_histogram,
            Self::MetricsExponentialHistogram => &names.metrics_exponential_histogram,
            Self::MetricsSummary => &names.metrics_summary,
        }
    }

    /// Column layout, in insertion order.
    pub fn columns(self) -> Vec<Column> {
        match self {
            Self::Logs => logs::COLUMNS.to_vec(),
            Self::Traces => traces::COLUMNS.to_vec(),
            Self::MetricsGauge => metrics::columns(metrics::GAUGE),
            Self::MetricsSum => metrics::columns(metrics::SUM),
            Self::MetricsHistogram => metrics::columns(metrics::HISTOGRAM),
            Self::MetricsExponentialHistogram => metrics::columns(metrics::EXPONENTIAL_HISTOGRAM),
            Self::MetricsSummary => metrics::columns(metrics::SUMMARY),
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for this table.
    pub fn create_sql(self, names: &TableNames) -> String {
        let columns = self
            .columns()
            .iter()
            .map(|c| format!("    {} {}", quote_ident(c.name), c.ty))
            .collect::<Vec<_>>()
            .join(",\n");
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{columns}\n)",
            quote_ident(self.name(names))
        )
    }

    /// Positional-parameter `INSERT` covering every column.
    pub fn insert_sql(self, names: &TableNames) -> String {
        let columns = self.columns();
        let idents = columns
            .iter()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let binds = columns
            .iter()
            .map(|c| c.ty.bind_expr())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({idents}) VALUES ({binds})",
            quote_ident(self.name(names))
        )
    }

    /// Select list that reads every column back under its own name.
    pub fn select_list(self) -> String {
        self.columns()
            .iter()
            .map(|c| c.ty.select_expr(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Columns
// ============================================================================

/// A column declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// DuckDB column types used by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    UBigInt,
    Integer,
    UInteger,
    Double,
    Boolean,
    Varchar,
    /// JSON object holding an attribute map.
    Json,
    /// List of `UBIGINT`, `DOUBLE` or `VARCHAR`.
    List(ListType),
}

/// Element type of a list column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    UBigInt,
    Double,
    Varchar,
}

impl ListType {
    const fn as_sql(self) -> &'static str {
        match self {
            Self::UBigInt => "UBIGINT",
            Self::Double => "DOUBLE",
            Self::Varchar => "VARCHAR",
        }
    }
}

impl ColumnType {
    /// Placeholder expression used in `INSERT ... VALUES`.
    fn bind_expr(self) -> String {
        match self {
            Self::List(ListType::Double) => "CAST(CAST(? AS VARCHAR) AS DOUBLE[])".to_owned(),
            Self::List(elem) => {
                format!("from_json(CAST(? AS VARCHAR), '[\"{}\"]')", elem.as_sql())
            }
            _ => "?".to_owned(),
        }
    }

    /// Expression reading the column back as a Rust-friendly value.
    fn select_expr(self, name: &str) -> String {
        let ident = quote_ident(name);
        match self {
            Self::Json | Self::List(ListType::Double) => {
                format!("CAST({ident} AS VARCHAR) AS {ident}")
            }
            Self::List(_) => format!("CAST(to_json({ident}) AS VARCHAR) AS {ident}"),
            _ => ident,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UBigInt => f.write_str("UBIGINT"),
            Self::Integer => f.write_str("INTEGER"),
            Self::UInteger => f.write_str("UINTEGER"),
            Self::Double => f.write_str("DOUBLE"),
            Self::Boolean => f.write_str("BOOLEAN"),
            Self::Varchar => f.write_str("VARCHAR"),
            Self::Json => f.write_str("JSON"),
            Self::List(elem) => write!(f, "{}[]", elem.as_sql()),
        }
    }
}

// ============================================================================
// SQL quoting
// ============================================================================

/// Quote an identifier so configured names cannot break out of a statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a value for use inside a single-quoted SQL literal.
///
/// Only used for setup statements that DuckDB does not accept parameters
/// for (secrets, `ATTACH`). Null bytes are dropped.
pub fn escape_literal(s: &str) -> String {
    s.chars()
        .filter(|&c| c != '\0')
        .flat_map(|c| {
            if c == '\'' {
                vec!['\'', '\'']
            } else {
                vec![c]
            }
        })
        .collect()
}
