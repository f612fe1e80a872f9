//! Span flattening.
//!
//! Events and links become parallel arrays on the span row. Their attribute
//! maps are encoded as one JSON array per span with one object per event
//! (or link), so keys never collide across entries.

use std::sync::Arc;

use duckdb::{params, Statement};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, status::StatusCode, Span};

use super::attributes::{encode_attribute_list, encode_attributes, hex_id, json_list};
use super::{InsertRow, ResourceContext, ScopeContext};

/// One row of the traces table.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRow {
    pub resource: Arc<ResourceContext>,
    pub scope: Arc<ScopeContext>,
    /// Span start, Unix nanoseconds.
    pub timestamp: u64,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_state: String,
    pub name: String,
    pub kind: &'static str,
    pub attributes: String,
    /// Nanoseconds.
    pub duration: u64,
    pub status_code: &'static str,
    pub status_message: String,
    pub events_timestamp: Vec<u64>,
    pub events_name: Vec<String>,
    pub events_attributes: String,
    pub links_trace_id: Vec<String>,
    pub links_span_id: Vec<String>,
    pub links_trace_state: Vec<String>,
    pub links_attributes: String,
}

impl SpanRow {
    pub fn new(resource: &Arc<ResourceContext>, scope: &Arc<ScopeContext>, span: &Span) -> Self {
        let (status_code, status_message) = span
            .status
            .as_ref()
            .map_or(("unset", String::new()), |s| {
                (status_code_str(s.code()), s.message.clone())
            });

        Self {
            resource: Arc::clone(resource),
            scope: Arc::clone(scope),
            timestamp: span.start_time_unix_nano,
            trace_id: hex_id(&span.trace_id),
            span_id: hex_id(&span.span_id),
            parent_span_id: hex_id(&span.parent_span_id),
            trace_state: span.trace_state.clone(),
            name: span.name.clone(),
            kind: span_kind_str(span.kind()),
            attributes: encode_attributes(&span.attributes),
            duration: span
                .end_time_unix_nano
                .saturating_sub(span.start_time_unix_nano),
            status_code,
            status_message,
            events_timestamp: span.events.iter().map(|e| e.time_unix_nano).collect(),
            events_name: span.events.iter().map(|e| e.name.clone()).collect(),
            events_attributes: encode_attribute_list(
                span.events.iter().map(|e| e.attributes.as_slice()),
            ),
            links_trace_id: span.links.iter().map(|l| hex_id(&l.trace_id)).collect(),
            links_span_id: span.links.iter().map(|l| hex_id(&l.span_id)).collect(),
            links_trace_state: span.links.iter().map(|l| l.trace_state.clone()).collect(),
            links_attributes: encode_attribute_list(
                span.links.iter().map(|l| l.attributes.as_slice()),
            ),
        }
    }
}

impl InsertRow for SpanRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        let events_timestamp = json_list(&self.events_timestamp);
        let events_name = json_list(&self.events_name);
        let links_trace_id = json_list(&self.links_trace_id);
        let links_span_id = json_list(&self.links_span_id);
        let links_trace_state = json_list(&self.links_trace_state);

        stmt.execute(params![
            self.timestamp,
            self.trace_id,
            self.span_id,
            self.parent_span_id,
            self.trace_state,
            self.name,
            self.kind,
            self.resource.service_name,
            self.resource.schema_url,
            self.resource.attributes,
            self.scope.name,
            self.scope.version,
            self.scope.attributes,
            self.attributes,
            self.duration,
            self.status_code,
            self.status_message,
            events_timestamp,
            events_name,
            self.events_attributes,
            links_trace_id,
            links_span_id,
            links_trace_state,
            self.links_attributes,
        ])
    }
}

/// Lowercase kind name, as used by Jaeger's `spanKind` filter.
pub const fn span_kind_str(kind: SpanKind) -> &'static str {
    match kind {
        SpanKind::Unspecified => "unspecified",
        SpanKind::Internal => "internal",
        SpanKind::Server => "server",
        SpanKind::Client => "client",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
    }
}

pub const fn status_code_str(code: StatusCode) -> &'static str {
    match code {
        StatusCode::Unset => "unset",
        StatusCode::Ok => "ok",
        StatusCode::Error => "error",
    }
}

/// Flatten a traces payload into rows, in payload order.
pub fn flatten_traces(request: &ExportTraceServiceRequest) -> Vec<SpanRow> {
    let mut rows = Vec::new();
    for resource_spans in &request.resource_spans {
        let resource = Arc::new(ResourceContext::new(
            resource_spans.resource.as_ref(),
            &resource_spans.schema_url,
        ));
        for scope_spans in &resource_spans.scope_spans {
            let scope = Arc::new(ScopeContext::new(
                scope_spans.scope.as_ref(),
                &scope_spans.schema_url,
            ));
            rows.extend(
                scope_spans
                    .spans
                    .iter()
                    .map(|span| SpanRow::new(&resource, &scope, span)),
            );
        }
    }
    rows
}
