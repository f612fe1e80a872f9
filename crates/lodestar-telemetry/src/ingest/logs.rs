//! Log record flattening.

use std::sync::Arc;

use duckdb::{params, Statement};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::logs::v1::LogRecord;

use super::attributes::{body_to_string, encode_attributes, hex_id};
use super::{InsertRow, ResourceContext, ScopeContext};

/// One row of the logs table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub resource: Arc<ResourceContext>,
    pub scope: Arc<ScopeContext>,
    pub timestamp: u64,
    pub trace_id: String,
    pub span_id: String,
    pub trace_flags: u32,
    pub severity_text: String,
    pub severity_number: i32,
    pub body: String,
    pub attributes: String,
}

impl LogRow {
    pub fn new(
        resource: &Arc<ResourceContext>,
        scope: &Arc<ScopeContext>,
        record: &LogRecord,
    ) -> Self {
        let timestamp = if record.time_unix_nano != 0 {
            record.time_unix_nano
        } else {
            record.observed_time_unix_nano
        };

        Self {
            resource: Arc::clone(resource),
            scope: Arc::clone(scope),
            timestamp,
            trace_id: hex_id(&record.trace_id),
            span_id: hex_id(&record.span_id),
            // Lower 8 bits hold the W3C trace flags.
            trace_flags: record.flags & 0xff,
            severity_text: record.severity_text.clone(),
            severity_number: record.severity_number,
            body: body_to_string(record.body.as_ref()),
            attributes: encode_attributes(&record.attributes),
        }
    }
}

impl InsertRow for LogRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        stmt.execute(params![
            self.timestamp,
            self.trace_id,
            self.span_id,
            self.trace_flags,
            self.severity_text,
            self.severity_number,
            self.resource.service_name,
            self.body,
            self.resource.schema_url,
            self.resource.attributes,
            self.scope.schema_url,
            self.scope.name,
            self.scope.version,
            self.scope.attributes,
            self.attributes,
        ])
    }
}

/// Flatten a logs payload into rows, in payload order.
pub fn flatten_logs(request: &ExportLogsServiceRequest) -> Vec<LogRow> {
    let mut rows = Vec::new();
    for resource_logs in &request.resource_logs {
        let resource = Arc::new(ResourceContext::new(
            resource_logs.resource.as_ref(),
            &resource_logs.schema_url,
        ));
        for scope_logs in &resource_logs.scope_logs {
            let scope = Arc::new(ScopeContext::new(
                scope_logs.scope.as_ref(),
                &scope_logs.schema_url,
            ));
            rows.extend(
                scope_logs
                    .log_records
                    .iter()
                    .map(|record| LogRow::new(&resource, &scope, record)),
            );
        }
    }
    rows
}
