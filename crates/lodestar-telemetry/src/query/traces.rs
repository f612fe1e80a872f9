//! Jaeger-style trace reads: services, operations, search, lookup and
//! the service dependency graph.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use duckdb::types::Value;
use tokio_util::sync::CancellationToken;

use super::model::{
    duration_nanos, unix_nanos, DependencyLink, DependencyQuery, SpanRecord, TraceQuery,
    TraceView,
};
use super::reconstruct::reconstruct_trace;
use super::rows::{query_rows, RawSpan};
use crate::schema::{quote_ident, Table, TableNames};
use crate::storage::Storage;
use crate::TelemetryError;

/// `WHERE` clause with its positional parameters.
#[derive(Debug, Default)]
struct Filters {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filters {
    fn push(&mut self, clause: &str, param: Value) {
        self.clauses.push(clause.to_owned());
        self.params.push(param);
    }

    fn render(&self) -> String {
        if self.clauses.is_empty() {
            "TRUE".to_owned()
        } else {
            self.clauses.join(" AND ")
        }
    }
}

fn trace_search_sql(
    names: &TableNames,
    query: &TraceQuery,
    limit: usize,
    row_limit: usize,
) -> (String, Vec<Value>) {
    let table = quote_ident(Table::Traces.name(names));
    let mut filters = Filters::default();
    filters.clauses.push("trace_id <> ''".to_owned());

    if let Some(service) = &query.service {
        filters.push("service_name = ?", Value::Text(service.clone()));
    }
    if let Some(operation) = &query.operation {
        filters.push("span_name = ?", Value::Text(operation.clone()));
    }
    if let Some(start) = query.start_time_min {
        filters.push("\"timestamp\" >= ?", Value::UBigInt(unix_nanos(start)));
    }
    if let Some(end) = query.start_time_max {
        filters.push("\"timestamp\" <= ?", Value::UBigInt(unix_nanos(end)));
    }
    if let Some(min) = query.min_duration {
        filters.push("duration >= ?", Value::UBigInt(duration_nanos(min)));
    }
    if let Some(max) = query.max_duration {
        filters.push("duration <= ?", Value::UBigInt(duration_nanos(max)));
    }

    let sql = format!(
        "WITH matched AS (\
            SELECT trace_id, max(\"timestamp\") AS latest FROM {table} \
            WHERE {filters} \
            GROUP BY trace_id \
            ORDER BY latest DESC, trace_id \
            LIMIT {limit}\
         ) \
         SELECT {select} FROM {table} JOIN matched USING (trace_id) \
         ORDER BY matched.latest DESC, trace_id \
         LIMIT {row_limit}",
        filters = filters.render(),
        select = Table::Traces.select_list(),
    );
    (sql, filters.params)
}

fn dependencies_sql(names: &TableNames, query: &DependencyQuery) -> (String, Vec<Value>) {
    let table = quote_ident(Table::Traces.name(names));
    let mut filters = Filters::default();
    filters.clauses.push("child.parent_span_id <> ''".to_owned());

    let end = query.end_time.map(unix_nanos);
    if let Some(end) = end {
        filters.push("child.\"timestamp\" <= ?", Value::UBigInt(end));
    }
    if let (Some(end), Some(lookback)) = (end, query.lookback) {
        let start = end.saturating_sub(duration_nanos(lookback));
        filters.push("child.\"timestamp\" >= ?", Value::UBigInt(start));
    }

    let sql = format!(
        "SELECT parent.service_name AS parent, child.service_name AS child, \
                count(*) AS call_count \
         FROM {table} AS child \
         JOIN {table} AS parent \
           ON child.trace_id = parent.trace_id AND child.parent_span_id = parent.span_id \
         WHERE {filters} \
         GROUP BY parent.service_name, child.service_name \
         ORDER BY parent, child",
        filters = filters.render(),
    );
    (sql, filters.params)
}

/// Group spans by trace id, keeping traces in first-seen order.
fn group_by_trace(spans: Vec<SpanRecord>) -> Vec<(String, Vec<SpanRecord>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut traces: Vec<(String, Vec<SpanRecord>)> = Vec::new();
    for span in spans {
        match index.get(&span.trace_id) {
            Some(&i) => traces[i].1.push(span),
            None => {
                index.insert(span.trace_id.clone(), traces.len());
                traces.push((span.trace_id.clone(), vec![span]));
            }
        }
    }
    traces
}

fn read_spans(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[Value],
    table: &str,
    cancel: &CancellationToken,
) -> Result<Vec<SpanRecord>, TelemetryError> {
    query_rows(conn, sql, params, table, cancel, RawSpan::from_row)?
        .into_iter()
        .map(RawSpan::decode)
        .collect()
}

impl Storage {
    /// Every service that has reported a span, sorted.
    #[tracing::instrument(skip_all)]
    pub async fn list_services(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, TelemetryError> {
        let names = self.tables();
        self.run(cancel, move |conn, cancel| {
            let table = Table::Traces.name(&names);
            let sql = format!(
                "SELECT DISTINCT service_name FROM {} ORDER BY service_name",
                quote_ident(table)
            );
            query_rows(conn, &sql, &[], table, cancel, |row| row.get(0))
        })
        .await
    }

    /// Distinct span names of a service, optionally restricted to a span kind.
    ///
    /// The kind is matched case-insensitively (`SERVER` and `server` are the
    /// same filter).
    #[tracing::instrument(skip_all, fields(service = service))]
    pub async fn list_operations(
        &self,
        service: &str,
        span_kind: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, TelemetryError> {
        let names = self.tables();
        let mut filters = Filters::default();
        filters.push("service_name = ?", Value::Text(service.to_owned()));
        if let Some(kind) = span_kind.filter(|k| !k.is_empty()) {
            filters.push("span_kind = ?", Value::Text(kind.to_ascii_lowercase()));
        }

        self.run(cancel, move |conn, cancel| {
            let table = Table::Traces.name(&names);
            let sql = format!(
                "SELECT DISTINCT span_name FROM {} WHERE {} ORDER BY span_name",
                quote_ident(table),
                filters.render()
            );
            query_rows(conn, &sql, &filters.params, table, cancel, |row| row.get(0))
        })
        .await
    }

    /// Newest traces with at least one span matching the query.
    ///
    /// Traces come back newest first. The total number of span rows read is
    /// capped by the configured search row limit.
    #[tracing::instrument(skip_all, fields(service = query.service.as_deref()))]
    pub async fn search_traces(
        &self,
        query: &TraceQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<TraceView>, TelemetryError> {
        let names = self.tables();
        let limit = query.limit_or(self.query_config().default_search_limit);
        let row_limit = self.query_config().search_row_limit;
        let (sql, params) = trace_search_sql(&names, query, limit, row_limit);

        let spans = self
            .run(cancel, move |conn, cancel| {
                read_spans(conn, &sql, &params, Table::Traces.name(&names), cancel)
            })
            .await?;

        let span_count = spans.len();
        let traces: Vec<_> = group_by_trace(spans)
            .into_iter()
            .map(|(trace_id, spans)| reconstruct_trace(&trace_id, spans))
            .collect();
        tracing::debug!(traces = traces.len(), spans = span_count, "trace search done");
        Ok(traces)
    }

    /// Every span of one trace.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::TraceNotFound`] when no span has this id.
    pub async fn get_trace(
        &self,
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<TraceView, TelemetryError> {
        self.get_trace_in_range(trace_id, None, None, cancel).await
    }

    /// Every span of one trace that starts within the given window.
    #[tracing::instrument(skip_all, fields(trace_id = trace_id))]
    pub async fn get_trace_in_range(
        &self,
        trace_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<TraceView, TelemetryError> {
        let trace_id = trace_id.trim().to_ascii_lowercase();
        let names = self.tables();
        let mut filters = Filters::default();
        filters.push("trace_id = ?", Value::Text(trace_id.clone()));
        if let Some(start) = start {
            filters.push("\"timestamp\" >= ?", Value::UBigInt(unix_nanos(start)));
        }
        if let Some(end) = end {
            filters.push("\"timestamp\" <= ?", Value::UBigInt(unix_nanos(end)));
        }

        let spans = self
            .run(cancel, move |conn, cancel| {
                let table = Table::Traces.name(&names);
                let sql = format!(
                    "SELECT {} FROM {} WHERE {}",
                    Table::Traces.select_list(),
                    quote_ident(table),
                    filters.render()
                );
                read_spans(conn, &sql, &filters.params, table, cancel)
            })
            .await?;

        if spans.is_empty() {
            return Err(TelemetryError::TraceNotFound { trace_id });
        }
        Ok(reconstruct_trace(&trace_id, spans))
    }

    /// Call counts between services, from parent/child span pairs.
    #[tracing::instrument(skip_all)]
    pub async fn get_dependencies(
        &self,
        query: &DependencyQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<DependencyLink>, TelemetryError> {
        let names = self.tables();
        let (sql, params) = dependencies_sql(&names, query);
        self.run(cancel, move |conn, cancel| {
            let table = Table::Traces.name(&names);
            query_rows(conn, &sql, &params, table, cancel, |row| {
                let count: i64 = row.get("call_count")?;
                Ok(DependencyLink {
                    parent: row.get("parent")?,
                    child: row.get("child")?,
                    call_count: u64::try_from(count).unwrap_or(0),
                })
            })
        })
        .await
    }
}
