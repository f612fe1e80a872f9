//! Newest rows of each table, for raw browsing.

use tokio_util::sync::CancellationToken;

use super::model::{LogRecordView, MetricRecordView, SpanRecord};
use super::rows::{query_rows, RawLog, RawMetric, RawSpan};
use crate::ingest::MetricShape;
use crate::schema::{quote_ident, Table, TableNames};
use crate::storage::Storage;
use crate::TelemetryError;

fn recent_sql(names: &TableNames, table: Table, limit: usize) -> String {
    format!(
        "SELECT {} FROM {} ORDER BY \"timestamp\" DESC LIMIT {limit}",
        table.select_list(),
        quote_ident(table.name(names)),
    )
}

impl Storage {
    /// Newest log records, newest first.
    pub async fn recent_logs(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogRecordView>, TelemetryError> {
        let names = self.tables();
        let sql = recent_sql(&names, Table::Logs, self.query_config().recent_row_limit);
        let raw = self
            .run(cancel, move |conn, cancel| {
                query_rows(conn, &sql, &[], Table::Logs.name(&names), cancel, RawLog::from_row)
            })
            .await?;
        raw.into_iter().map(RawLog::decode).collect()
    }

    /// Newest spans, newest first.
    pub async fn recent_spans(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<SpanRecord>, TelemetryError> {
        let names = self.tables();
        let sql = recent_sql(&names, Table::Traces, self.query_config().recent_row_limit);
        let raw = self
            .run(cancel, move |conn, cancel| {
                query_rows(conn, &sql, &[], Table::Traces.name(&names), cancel, RawSpan::from_row)
            })
            .await?;
        raw.into_iter().map(RawSpan::decode).collect()
    }

    /// Newest points of one metric shape, newest first.
    #[tracing::instrument(skip_all, fields(shape = %shape))]
    pub async fn recent_metrics(
        &self,
        shape: MetricShape,
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricRecordView>, TelemetryError> {
        let names = self.tables();
        let table = shape.table();
        let sql = recent_sql(&names, table, self.query_config().recent_row_limit);
        let raw = self
            .run(cancel, move |conn, cancel| {
                query_rows(conn, &sql, &[], table.name(&names), cancel, |row| {
                    RawMetric::from_row(shape, row)
                })
            })
            .await?;
        raw.into_iter().map(RawMetric::decode).collect()
    }
}
