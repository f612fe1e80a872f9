//! Metric routing and concurrent commit.
//!
//! A [`MetricsBatch`] is created per payload. [`MetricsBatch::add`] routes each
//! metric by its data shape into one of five typed accumulators, keeping the
//! native OTLP data. [`MetricsBatch::commit`] then flattens and inserts every
//! non-empty accumulator on its own blocking worker, waits for all of them and
//! reports every failure together. Tables that succeeded stay committed.

use std::fmt;
use std::sync::Arc;

use duckdb::{types::ToSql, Connection, Statement};
use opentelemetry_proto::tonic::metrics::v1::{
    metric, ExponentialHistogram, Gauge, Histogram, Metric, NumberDataPoint, Sum, Summary,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::attributes::{double_list, encode_attributes, json_list, resolve_number};
use super::{insert_rows, InsertRow, ResourceContext, ScopeContext};
use crate::error::MetricsCommitError;
use crate::schema::{Table, TableNames};
use crate::storage::{ensure_active, Storage};
use crate::TelemetryError;

// ============================================================================
// Shapes
// ============================================================================

/// The five metric data shapes, one table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricShape {
    Gauge,
    Sum,
    Histogram,
    ExponentialHistogram,
    Summary,
}

impl MetricShape {
    pub const ALL: [Self; 5] = [
        Self::Gauge,
        Self::Sum,
        Self::Histogram,
        Self::ExponentialHistogram,
        Self::Summary,
    ];

    /// Shape of a metric's data.
    pub const fn of(data: &metric::Data) -> Self {
        match data {
            metric::Data::Gauge(_) => Self::Gauge,
            metric::Data::Sum(_) => Self::Sum,
            metric::Data::Histogram(_) => Self::Histogram,
            metric::Data::ExponentialHistogram(_) => Self::ExponentialHistogram,
            metric::Data::Summary(_) => Self::Summary,
        }
    }

    pub const fn table(self) -> Table {
        match self {
            Self::Gauge => Table::MetricsGauge,
            Self::Sum => Table::MetricsSum,
            Self::Histogram => Table::MetricsHistogram,
            Self::ExponentialHistogram => Table::MetricsExponentialHistogram,
            Self::Summary => Table::MetricsSummary,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Sum => "sum",
            Self::Histogram => "histogram",
            Self::ExponentialHistogram => "exponential_histogram",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Accumulation
// ============================================================================

/// Everything a metric row needs besides the data point itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricMetadata {
    pub resource: Arc<ResourceContext>,
    pub scope: Arc<ScopeContext>,
    pub name: String,
    pub description: String,
    pub unit: String,
}

/// Append-only list of metrics of one shape plus a running point count.
#[derive(Debug)]
struct Accumulator<T> {
    entries: Vec<(Arc<MetricMetadata>, T)>,
    points: usize,
}

impl<T> Default for Accumulator<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            points: 0,
        }
    }
}

impl<T> Accumulator<T> {
    fn push(&mut self, metadata: Arc<MetricMetadata>, data: T, points: usize) {
        self.entries.push((metadata, data));
        self.points += points;
    }

    fn is_empty(&self) -> bool {
        self.points == 0
    }
}

/// Request-scoped metric accumulators, one per shape.
#[derive(Debug, Default)]
pub struct MetricsBatch {
    gauge: Accumulator<Gauge>,
    sum: Accumulator<Sum>,
    histogram: Accumulator<Histogram>,
    exponential_histogram: Accumulator<ExponentialHistogram>,
    summary: Accumulator<Summary>,
}

impl MetricsBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one metric to the accumulator for its shape.
    ///
    /// A metric without data cannot be routed and is rejected.
    pub fn add(
        &mut self,
        resource: &Arc<ResourceContext>,
        scope: &Arc<ScopeContext>,
        metric: &Metric,
    ) -> Result<(), TelemetryError> {
        let Some(data) = &metric.data else {
            return Err(TelemetryError::UnsetMetricType {
                metric: metric.name.clone(),
            });
        };

        let metadata = Arc::new(MetricMetadata {
            resource: Arc::clone(resource),
            scope: Arc::clone(scope),
            name: metric.name.clone(),
            description: metric.description.clone(),
            unit: metric.unit.clone(),
        });

        match data {
            metric::Data::Gauge(gauge) => {
                let points = gauge.data_points.len();
                self.gauge.push(metadata, gauge.clone(), points);
            }
            metric::Data::Sum(sum) => {
                let points = sum.data_points.len();
                self.sum.push(metadata, sum.clone(), points);
            }
            metric::Data::Histogram(histogram) => {
                let points = histogram.data_points.len();
                self.histogram.push(metadata, histogram.clone(), points);
            }
            metric::Data::ExponentialHistogram(histogram) => {
                let points = histogram.data_points.len();
                self.exponential_histogram
                    .push(metadata, histogram.clone(), points);
            }
            metric::Data::Summary(summary) => {
                let points = summary.data_points.len();
                self.summary.push(metadata, summary.clone(), points);
            }
        }
        Ok(())
    }

    /// Data points accumulated for a shape.
    pub fn points(&self, shape: MetricShape) -> usize {
        match shape {
            MetricShape::Gauge => self.gauge.points,
            MetricShape::Sum => self.sum.points,
            MetricShape::Histogram => self.histogram.points,
            MetricShape::ExponentialHistogram => self.exponential_histogram.points,
            MetricShape::Summary => self.summary.points,
        }
    }

    /// Flatten every non-empty accumulator into rows.
    pub fn into_rows(self) -> Vec<MetricRows> {
        self.into_pending()
            .into_iter()
            .map(Pending::into_rows)
            .collect()
    }

    /// Insert every non-empty shape concurrently and wait for all of them.
    ///
    /// Each shape is flattened and inserted on its own blocking worker.
    /// Connections are taken before any worker starts, so a connection
    /// failure leaves nothing running. Returns the number of rows written, or
    /// a [`TelemetryError::MetricsCommit`] holding every failure.
    pub async fn commit(
        self,
        storage: &Storage,
        cancel: &CancellationToken,
    ) -> Result<usize, TelemetryError> {
        ensure_active(cancel)?;
        let names = storage.tables();
        let pending = self
            .into_pending()
            .into_iter()
            .map(|shape| storage.connection().map(|conn| (shape, conn)))
            .collect::<Result<Vec<_>, TelemetryError>>()?;

        let mut workers = JoinSet::new();
        for (shape, conn) in pending {
            let names = Arc::clone(&names);
            let cancel = cancel.clone();
            workers.spawn_blocking(move || shape.into_rows().insert(&conn, &names, &cancel));
        }

        let mut written = 0;
        let mut failures = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(rows)) => written += rows,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "metric table commit failed");
                    failures.push(err);
                }
                Err(join_err) => failures.push(TelemetryError::from(join_err)),
            }
        }

        if failures.is_empty() {
            Ok(written)
        } else {
            Err(TelemetryError::MetricsCommit(MetricsCommitError::new(
                failures,
            )))
        }
    }

    fn into_pending(self) -> Vec<Pending> {
        let mut pending = Vec::with_capacity(MetricShape::ALL.len());
        if !self.gauge.is_empty() {
            pending.push(Pending::Gauge(self.gauge));
        }
        if !self.sum.is_empty() {
            pending.push(Pending::Sum(self.sum));
        }
        if !self.histogram.is_empty() {
            pending.push(Pending::Histogram(self.histogram));
        }
        if !self.exponential_histogram.is_empty() {
            pending.push(Pending::ExponentialHistogram(self.exponential_histogram));
        }
        if !self.summary.is_empty() {
            pending.push(Pending::Summary(self.summary));
        }
        pending
    }
}

/// One non-empty accumulator, not yet flattened.
enum Pending {
    Gauge(Accumulator<Gauge>),
    Sum(Accumulator<Sum>),
    Histogram(Accumulator<Histogram>),
    ExponentialHistogram(Accumulator<ExponentialHistogram>),
    Summary(Accumulator<Summary>),
}

impl Pending {
    fn into_rows(self) -> MetricRows {
        match self {
            Self::Gauge(acc) => MetricRows::Gauge(flatten(acc, gauge_rows)),
            Self::Sum(acc) => MetricRows::Sum(flatten(acc, sum_rows)),
            Self::Histogram(acc) => MetricRows::Histogram(flatten(acc, histogram_rows)),
            Self::ExponentialHistogram(acc) => {
                MetricRows::ExponentialHistogram(flatten(acc, exponential_histogram_rows))
            }
            Self::Summary(acc) => MetricRows::Summary(flatten(acc, summary_rows)),
        }
    }
}

fn flatten<T, R>(
    acc: Accumulator<T>,
    to_rows: impl Fn(&Arc<MetricMetadata>, &T, &mut Vec<R>),
) -> Vec<R> {
    let mut rows = Vec::with_capacity(acc.points);
    for (metadata, data) in &acc.entries {
        to_rows(metadata, data, &mut rows);
    }
    rows
}

// ============================================================================
// Rows
// ============================================================================

/// Flattened rows for one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricRows {
    Gauge(Vec<GaugeRow>),
    Sum(Vec<SumRow>),
    Histogram(Vec<HistogramRow>),
    ExponentialHistogram(Vec<ExponentialHistogramRow>),
    Summary(Vec<SummaryRow>),
}

impl MetricRows {
    pub const fn shape(&self) -> MetricShape {
        match self {
            Self::Gauge(_) => MetricShape::Gauge,
            Self::Sum(_) => MetricShape::Sum,
            Self::Histogram(_) => MetricShape::Histogram,
            Self::ExponentialHistogram(_) => MetricShape::ExponentialHistogram,
            Self::Summary(_) => MetricShape::Summary,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Gauge(rows) => rows.len(),
            Self::Sum(rows) => rows.len(),
            Self::Histogram(rows) => rows.len(),
            Self::ExponentialHistogram(rows) => rows.len(),
            Self::Summary(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(
        &self,
        conn: &Connection,
        names: &TableNames,
        cancel: &CancellationToken,
    ) -> Result<usize, TelemetryError> {
        let table = self.shape().table();
        match self {
            Self::Gauge(rows) => insert_rows(conn, names, table, rows, cancel),
            Self::Sum(rows) => insert_rows(conn, names, table, rows, cancel),
            Self::Histogram(rows) => insert_rows(conn, names, table, rows, cancel),
            Self::ExponentialHistogram(rows) => insert_rows(conn, names, table, rows, cancel),
            Self::Summary(rows) => insert_rows(conn, names, table, rows, cancel),
        }
    }
}

/// Columns shared by every metric table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricHeader {
    pub metadata: Arc<MetricMetadata>,
    pub timestamp: u64,
    pub start_timestamp: u64,
    pub attributes: String,
    pub flags: u32,
}

impl MetricHeader {
    fn new(
        metadata: &Arc<MetricMetadata>,
        time: u64,
        start_time: u64,
        attributes: &[opentelemetry_proto::tonic::common::v1::KeyValue],
        flags: u32,
    ) -> Self {
        Self {
            metadata: Arc::clone(metadata),
            timestamp: if time != 0 { time } else { start_time },
            start_timestamp: start_time,
            attributes: encode_attributes(attributes),
            flags,
        }
    }

    fn params(&self) -> Vec<&dyn ToSql> {
        let m = &*self.metadata;
        let params: [&dyn ToSql; 13] = [
            &self.timestamp,
            &self.start_timestamp,
            &m.resource.service_name,
            &m.name,
            &m.description,
            &m.unit,
            &m.resource.schema_url,
            &m.resource.attributes,
            &m.scope.schema_url,
            &m.scope.name,
            &m.scope.version,
            &self.attributes,
            &self.flags,
        ];
        params.to_vec()
    }
}

fn execute_with_header(
    stmt: &mut Statement<'_>,
    header: &MetricHeader,
    payload: &[&dyn ToSql],
) -> duckdb::Result<usize> {
    let mut params = header.params();
    params.extend_from_slice(payload);
    stmt.execute(params.as_slice())
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeRow {
    pub header: MetricHeader,
    pub value: f64,
}

impl InsertRow for GaugeRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        execute_with_header(stmt, &self.header, &[&self.value])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SumRow {
    pub header: MetricHeader,
    pub value: f64,
    pub aggregation_temporality: i32,
    pub is_monotonic: bool,
}

impl InsertRow for SumRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        execute_with_header(
            stmt,
            &self.header,
            &[
                &self.value,
                &self.aggregation_temporality,
                &self.is_monotonic,
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramRow {
    pub header: MetricHeader,
    pub count: u64,
    pub sum: Option<f64>,
    pub bucket_counts: Vec<u64>,
    pub explicit_bounds: Vec<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl InsertRow for HistogramRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        let bucket_counts = json_list(&self.bucket_counts);
        let explicit_bounds = double_list(&self.explicit_bounds);
        execute_with_header(
            stmt,
            &self.header,
            &[
                &self.count,
                &self.sum,
                &bucket_counts,
                &explicit_bounds,
                &self.min,
                &self.max,
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialHistogramRow {
    pub header: MetricHeader,
    pub count: u64,
    pub sum: Option<f64>,
    pub scale: i32,
    pub zero_count: u64,
    pub zero_threshold: f64,
    pub positive_offset: i32,
    pub positive_bucket_counts: Vec<u64>,
    pub negative_offset: i32,
    pub negative_bucket_counts: Vec<u64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl InsertRow for ExponentialHistogramRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        let positive = json_list(&self.positive_bucket_counts);
        let negative = json_list(&self.negative_bucket_counts);
        execute_with_header(
            stmt,
            &self.header,
            &[
                &self.count,
                &self.sum,
                &self.scale,
                &self.zero_count,
                &self.zero_threshold,
                &self.positive_offset,
                &positive,
                &self.negative_offset,
                &negative,
                &self.min,
                &self.max,
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub header: MetricHeader,
    pub count: u64,
    pub sum: f64,
    pub quantiles: Vec<f64>,
    pub quantile_values: Vec<f64>,
}

impl InsertRow for SummaryRow {
    fn execute(&self, stmt: &mut Statement<'_>) -> duckdb::Result<usize> {
        let quantiles = double_list(&self.quantiles);
        let values = double_list(&self.quantile_values);
        execute_with_header(
            stmt,
            &self.header,
            &[&self.count, &self.sum, &quantiles, &values],
        )
    }
}

// ============================================================================
// Flattening
// ============================================================================

fn number_header(metadata: &Arc<MetricMetadata>, point: &NumberDataPoint) -> MetricHeader {
    MetricHeader::new(
        metadata,
        point.time_unix_nano,
        point.start_time_unix_nano,
        &point.attributes,
        point.flags,
    )
}

fn gauge_rows(metadata: &Arc<MetricMetadata>, gauge: &Gauge, out: &mut Vec<GaugeRow>) {
    out.extend(gauge.data_points.iter().map(|point| GaugeRow {
        header: number_header(metadata, point),
        value: resolve_number(point.value.as_ref()),
    }));
}

fn sum_rows(metadata: &Arc<MetricMetadata>, sum: &Sum, out: &mut Vec<SumRow>) {
    out.extend(sum.data_points.iter().map(|point| SumRow {
        header: number_header(metadata, point),
        value: resolve_number(point.value.as_ref()),
        aggregation_temporality: sum.aggregation_temporality,
        is_monotonic: sum.is_monotonic,
    }));
}

fn histogram_rows(
    metadata: &Arc<MetricMetadata>,
    histogram: &Histogram,
    out: &mut Vec<HistogramRow>,
) {
    out.extend(histogram.data_points.iter().map(|point| HistogramRow {
        header: MetricHeader::new(
            metadata,
            point.time_unix_nano,
            point.start_time_unix_nano,
            &point.attributes,
            point.flags,
        ),
        count: point.count,
        sum: point.sum,
        bucket_counts: point.bucket_counts.clone(),
        explicit_bounds: point.explicit_bounds.clone(),
        min: point.min,
        max: point.max,
    }));
}

fn exponential_histogram_rows(
    metadata: &Arc<MetricMetadata>,
    histogram: &ExponentialHistogram,
    out: &mut Vec<ExponentialHistogramRow>,
) {
    out.extend(histogram.data_points.iter().map(|point| {
        let (positive_offset, positive_bucket_counts) = point
            .positive
            .as_ref()
            .map_or((0, Vec::new()), |b| (b.offset, b.bucket_counts.clone()));
        let (negative_offset, negative_bucket_counts) = point
            .negative
            .as_ref()
            .map_or((0, Vec::new()), |b| (b.offset, b.bucket_counts.clone()));

        ExponentialHistogramRow {
            header: MetricHeader::new(
                metadata,
                point.time_unix_nano,
                point.start_time_unix_nano,
                &point.attributes,
                point.flags,
            ),
            count: point.count,
            sum: point.sum,
            scale: point.scale,
            zero_count: point.zero_count,
            zero_threshold: point.zero_threshold,
            positive_offset,
            positive_bucket_counts,
            negative_offset,
            negative_bucket_counts,
            min: point.min,
            max: point.max,
        }
    }));
}

fn summary_rows(metadata: &Arc<MetricMetadata>, summary: &Summary, out: &mut Vec<SummaryRow>) {
    out.extend(summary.data_points.iter().map(|point| SummaryRow {
        header: MetricHeader::new(
            metadata,
            point.time_unix_nano,
            point.start_time_unix_nano,
            &point.attributes,
            point.flags,
        ),
        count: point.count,
        sum: point.sum,
        quantiles: point.quantile_values.iter().map(|q| q.quantile).collect(),
        quantile_values: point.quantile_values.iter().map(|q| q.value).collect(),
    }));
}
