//! Lodestar Telemetry - OTLP storage and Jaeger-compatible query core.
//!
//! This crate stores OpenTelemetry logs, traces and metrics in DuckDB and
//! reads traces back in the shape the Jaeger UI expects:
//! - Flattens OTLP export requests into one relational row per record
//! - Routes metrics by data shape and commits the shapes concurrently
//! - Runs on a local DuckDB file or on DuckLake (PostgreSQL catalog + S3 data)
//! - Answers service, operation, trace search, trace lookup and dependency
//!   queries
//!
//! ## Architecture
//!
//! ```text
//! OTLP request → flatten (resource → scope → record) → DuckDB tables
//!                                                           ↓
//!                             SQL templates → row decode → Jaeger views
//! ```
//!
//! The transport layer (gRPC/HTTP servers) lives outside this crate; it hands
//! decoded requests to [`Storage`] and maps [`TelemetryError`] to
//! `tonic::Status`.

pub mod config;
pub mod error;
pub mod ingest;
pub mod query;
pub mod schema;
pub mod storage;

#[cfg(test)]
pub mod test_fixtures;

pub use config::TelemetryConfig;
pub use error::{ErrorKind, MetricsCommitError, TelemetryError};
pub use ingest::{IngestSummary, MetricShape};
pub use schema::{Table, TableNames};
pub use storage::{Backend, Storage};
