//! Rebuild Jaeger trace views from stored spans.

use std::collections::{BTreeMap, HashMap};

use super::model::{
    ProcessView, RefType, SpanLog, SpanRecord, SpanReference, SpanView, Tag, TraceView,
};

const NANOS_PER_MICRO: u64 = 1_000;

/// Assemble one trace from its spans, in the order given.
///
/// Each distinct service gets a process id (`p1`, `p2`, ...) in first-seen
/// order. An empty span list yields a view with no spans.
pub fn reconstruct_trace(trace_id: &str, spans: Vec<SpanRecord>) -> TraceView {
    let mut process_ids: HashMap<String, String> = HashMap::new();
    let mut processes = BTreeMap::new();
    let mut views = Vec::with_capacity(spans.len());

    for span in spans {
        let process_id = match process_ids.get(&span.service_name) {
            Some(id) => id.clone(),
            None => {
                let id = format!("p{}", process_ids.len() + 1);
                process_ids.insert(span.service_name.clone(), id.clone());
                processes.insert(id.clone(), process_view(&span));
                id
            }
        };
        views.push(span_view(span, process_id));
    }

    TraceView {
        trace_id: trace_id.to_owned(),
        spans: views,
        processes,
        warnings: None,
    }
}

fn process_view(span: &SpanRecord) -> ProcessView {
    ProcessView {
        service_name: span.service_name.clone(),
        tags: span
            .resource_attributes
            .iter()
            .map(|(key, value)| Tag::from_json(key.as_str(), value))
            .collect(),
    }
}

fn span_view(span: SpanRecord, process_id: String) -> SpanView {
    let mut references = Vec::with_capacity(1 + span.links.len());
    if !span.parent_span_id.is_empty() {
        references.push(SpanReference {
            ref_type: RefType::ChildOf,
            trace_id: span.trace_id.clone(),
            span_id: span.parent_span_id.clone(),
        });
    }
    for link in &span.links {
        let is_parent = link.span_id == span.parent_span_id && link.trace_id == span.trace_id;
        if link.span_id.is_empty() || is_parent {
            continue;
        }
        references.push(SpanReference {
            ref_type: RefType::FollowsFrom,
            trace_id: link.trace_id.clone(),
            span_id: link.span_id.clone(),
        });
    }

    let logs = span
        .events
        .iter()
        .map(|event| {
            let mut fields = Vec::with_capacity(1 + event.attributes.len());
            fields.push(Tag::string("event", event.name.as_str()));
            fields.extend(
                event
                    .attributes
                    .iter()
                    .map(|(key, value)| Tag::from_json(key.as_str(), value)),
            );
            SpanLog {
                timestamp: event.timestamp / NANOS_PER_MICRO,
                fields,
            }
        })
        .collect();

    SpanView {
        tags: span_tags(&span),
        trace_id: span.trace_id,
        span_id: span.span_id,
        operation_name: span.name,
        references,
        start_time: span.timestamp / NANOS_PER_MICRO,
        duration: span.duration / NANOS_PER_MICRO,
        logs,
        process_id,
        warnings: None,
    }
}

/// Span attributes followed by the synthesised OpenTelemetry tags.
fn span_tags(span: &SpanRecord) -> Vec<Tag> {
    let mut tags: Vec<Tag> = span
        .attributes
        .iter()
        .map(|(key, value)| Tag::from_json(key.as_str(), value))
        .collect();

    tags.push(Tag::string("otel.scope.name", span.scope_name.as_str()));
    if !span.scope_version.is_empty() {
        tags.push(Tag::string("otel.scope.version", span.scope_version.as_str()));
    }
    tags.push(Tag::string("span.kind", span.kind.as_str()));

    if !span.status_code.is_empty() && span.status_code != "unset" {
        tags.push(Tag::string(
            "otel.status_code",
            span.status_code.to_ascii_uppercase(),
        ));
        if !span.status_message.is_empty() {
            tags.push(Tag::string(
                "otel.status_description",
                span.status_message.as_str(),
            ));
        }
    }
    if span.status_code == "error" {
        tags.push(Tag::bool("error", true));
    }
    if !span.trace_state.is_empty() {
        tags.push(Tag::string("w3c.tracestate", span.trace_state.as_str()));
    }
    tags
}
