//! OTLP ingestion into the relational schema.
//!
//! Each signal walks resource → scope → record. Resource and scope level
//! data (service name, attribute blobs, schema URLs) is encoded once and
//! shared by every row below it. Rows are flattened before any statement
//! runs; inserts then happen one statement per row, so the first failing
//! row aborts the rest of the payload.

pub mod attributes;
pub mod logs;
pub mod metrics;
pub mod traces;

use std::sync::Arc;

use duckdb::{Connection, Statement};
use opentelemetry_proto::tonic::collector::{
    logs::v1::ExportLogsServiceRequest, metrics::v1::ExportMetricsServiceRequest,
    trace::v1::ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::resource::v1::Resource;
use tokio_util::sync::CancellationToken;

use crate::schema::{Table, TableNames};
use crate::storage::{ensure_active, Storage};
use crate::TelemetryError;

pub use attributes::{decode_attributes, encode_attributes, hex_id, service_name};
pub use logs::{flatten_logs, LogRow};
pub use metrics::{MetricShape, MetricsBatch};
pub use traces::{flatten_traces, SpanRow};

/// Resource-level data shared by every row of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContext {
    pub service_name: String,
    pub schema_url: String,
    /// Encoded resource attributes.
    pub attributes: String,
}

impl ResourceContext {
    pub fn new(resource: Option<&Resource>, schema_url: &str) -> Self {
        Self {
            service_name: service_name(resource),
            schema_url: schema_url.to_owned(),
            attributes: encode_attributes(
                resource.map(|r| r.attributes.as_slice()).unwrap_or_default(),
            ),
        }
    }
}

/// Scope-level data shared by every row of one instrumentation scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeContext {
    pub name: String,
    pub version: String,
    pub schema_url: String,
    /// Encoded scope attributes.
    pub attributes: String,
}

impl ScopeContext {
    pub fn new(scope: Option<&InstrumentationScope>, schema_url: &str) -> Self {
        Self {
            name: scope.map(|s| s.name.clone()).unwrap_or_default(),
            version: scope.map(|s| s.version.clone()).unwrap_or_default(),
            schema_url: schema_url.to_owned(),
            attributes: encode_attributes(
                scope.map(|s| s.attributes.as_slice()).unwrap_or_default(),
            ),
        }
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Rows written across all tables.
    pub rows: usize,
}

/// A row that knows how to bind itself to its table's `INSERT`.
pub(crate) trait InsertRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize>;
}

/// Insert rows one statement at a time, stopping at the first failure or
/// once the token is cancelled.
pub(crate) fn insert_rows<R: InsertRow>(
    conn: &Connection,
    names: &TableNames,
    table: Table,
    rows: &[R],
    cancel: &CancellationToken,
) -> Result<usize, TelemetryError> {
    let table_name = table.name(names);
    ensure_active(cancel)?;
    let mut stmt = conn
        .prepare(&table.insert_sql(names))
        .map_err(TelemetryError::storage("prepare insert", table_name))?;

    for row in rows {
        ensure_active(cancel)?;
        row.execute(&mut stmt)
            .map_err(TelemetryError::storage("insert", table_name))?;
    }

    tracing::debug!(table = table_name, rows = rows.len(), "inserted rows");
    Ok(rows.len())
}

// ============================================================================
// Entry points
// ============================================================================

impl Storage {
    /// Persist every log record in the payload.
    #[tracing::instrument(skip_all, fields(resources = request.resource_logs.len()))]
    pub async fn ingest_logs(
        &self,
        request: &ExportLogsServiceRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, TelemetryError> {
        ensure_active(cancel)?;
        let rows = flatten_logs(request);
        if rows.is_empty() {
            return Ok(IngestSummary::default());
        }
        let names = self.tables();
        let rows = self
            .run(cancel, move |conn, cancel| {
                insert_rows(conn, &names, Table::Logs, &rows, cancel)
            })
            .await?;
        tracing::info!(rows, "ingested logs");
        Ok(IngestSummary { rows })
    }

    /// Persist every span in the payload.
    #[tracing::instrument(skip_all, fields(resources = request.resource_spans.len()))]
    pub async fn ingest_traces(
        &self,
        request: &ExportTraceServiceRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, TelemetryError> {
        ensure_active(cancel)?;
        let rows = flatten_traces(request);
        if rows.is_empty() {
            return Ok(IngestSummary::default());
        }
        let names = self.tables();
        let rows = self
            .run(cancel, move |conn, cancel| {
                insert_rows(conn, &names, Table::Traces, &rows, cancel)
            })
            .await?;
        tracing::info!(rows, "ingested spans");
        Ok(IngestSummary { rows })
    }

    /// Route every metric to its shape table and commit all shapes concurrently.
    ///
    /// A metric without a data shape rejects the whole payload before anything
    /// is written.
    #[tracing::instrument(skip_all, fields(resources = request.resource_metrics.len()))]
    pub async fn ingest_metrics(
        &self,
        request: &ExportMetricsServiceRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestSummary, TelemetryError> {
        ensure_active(cancel)?;
        let mut batch = MetricsBatch::new();
        for resource_metrics in &request.resource_metrics {
            let resource = Arc::new(ResourceContext::new(
                resource_metrics.resource.as_ref(),
                &resource_metrics.schema_url,
            ));
            for scope_metrics in &resource_metrics.scope_metrics {
                let scope = Arc::new(ScopeContext::new(
                    scope_metrics.scope.as_ref(),
                    &scope_metrics.schema_url,
                ));
                for metric in &scope_metrics.metrics {
                    batch.add(&resource, &scope, metric)?;
                }
            }
        }

        let rows = batch.commit(self, cancel).await?;
        tracing::info!(rows, "ingested metric points");
        Ok(IngestSummary { rows })
    }
}
