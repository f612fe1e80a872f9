//! Span table.
//!
//! Schema follows the [OTel Trace Data Model]. Events and links are flattened
//! into parallel list columns; their attribute maps are stored as one JSON
//! array per span, holding one object per event (or link) in order.
//!
//! [OTel Trace Data Model]: https://opentelemetry.io/docs/specs/otel/trace/api/

use super::{Column, ColumnType, ListType};

/// Span table columns, in insertion order.
pub const COLUMNS: &[Column] = &[
    // Span start.
    Column::new("timestamp", ColumnType::UBigInt),
    Column::new("trace_id", ColumnType::Varchar),
    Column::new("span_id", ColumnType::Varchar),
    Column::new("parent_span_id", ColumnType::Varchar),
    Column::new("trace_state", ColumnType::Varchar),
    Column::new("span_name", ColumnType::Varchar),
    Column::new("span_kind", ColumnType::Varchar),
    Column::new("service_name", ColumnType::Varchar),
    Column::new("resource_schema_url", ColumnType::Varchar),
    Column::new("resource_attributes", ColumnType::Json),
    Column::new("scope_name", ColumnType::Varchar),
    Column::new("scope_version", ColumnType::Varchar),
    Column::new("scope_attributes", ColumnType::Json),
    Column::new("span_attributes", ColumnType::Json),
    // Nanoseconds.
    Column::new("duration", ColumnType::UBigInt),
    Column::new("status_code", ColumnType::Varchar),
    Column::new("status_message", ColumnType::Varchar),
    Column::new("events_timestamp", ColumnType::List(ListType::UBigInt)),
    Column::new("events_name", ColumnType::List(ListType::Varchar)),
    Column::new("events_attributes", ColumnType::Json),
    Column::new("links_trace_id", ColumnType::List(ListType::Varchar)),
    Column::new("links_span_id", ColumnType::List(ListType::Varchar)),
    Column::new("links_trace_state", ColumnType::List(ListType::Varchar)),
    Column::new("links_attributes", ColumnType::Json),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_and_link_arrays_are_lists() {
        let lists: Vec<_> = COLUMNS
            .iter()
            .filter(|c| matches!(c.ty, ColumnType::List(_)))
            .map(|c| c.name)
            .collect();
        assert_eq!(
            lists,
            vec![
                "events_timestamp",
                "events_name",
                "links_trace_id",
                "links_span_id",
                "links_trace_state",
            ]
        );
    }
}
