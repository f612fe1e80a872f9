//! Read side: Jaeger-compatible trace queries and recent-row listings.
//!
//! Queries are methods on [`Storage`](crate::Storage). Rows are read on a
//! blocking worker, decoded, and traces are rebuilt into Jaeger views by
//! [`reconstruct_trace`], which needs no database.

pub mod model;
mod recent;
pub mod reconstruct;
mod rows;
mod traces;

pub use model::{
    Attributes, DependencyLink, DependencyQuery, LogRecordView, MetricRecordView, MetricValue,
    ProcessView, RefType, SpanEvent, SpanLink, SpanLog, SpanRecord, SpanReference, SpanView,
    Tag, TagType, TraceQuery, TraceView,
};
pub use reconstruct::reconstruct_trace;
