//! Error types for the telemetry crate.

use std::fmt;
use std::io;

/// Errors that can occur in the telemetry storage and query engine.
///
/// Large error types are boxed to keep the enum size small, which improves
/// performance when passing `Result<T, TelemetryError>` on the stack.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A metric arrived without a data shape, so it cannot be routed to a table.
    #[error("metric {metric:?} has no data type set")]
    UnsetMetricType {
        /// Name of the offending metric.
        metric: String,
    },

    /// A statement against a specific table failed.
    #[error("{operation} on table {table} failed: {source}")]
    Storage {
        /// What was being done (e.g. "insert", "create table").
        operation: &'static str,
        /// Table the statement targeted.
        table: String,
        /// Underlying database error (boxed - large type).
        source: Box<duckdb::Error>,
    },

    /// Database error not tied to a single table (boxed - large type).
    #[error("database error: {0}")]
    Database(Box<duckdb::Error>),

    /// A stored JSON blob could not be decoded.
    #[error("JSON decode error: {source}")]
    JsonDecode { source: serde_json::Error },

    /// A stored list column could not be parsed.
    #[error("column {column} holds an unreadable list: {value:?}")]
    ListDecode {
        /// Column the list was read from.
        column: &'static str,
        /// The stored text.
        value: String,
    },

    /// No spans exist for the requested trace id.
    #[error("trace {trace_id} not found")]
    TraceNotFound {
        /// The requested trace id.
        trace_id: String,
    },

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// One or more metric tables failed to commit.
    #[error(transparent)]
    MetricsCommit(MetricsCommitError),

    /// A blocking database worker panicked or was aborted.
    #[error("storage worker failed: {0}")]
    Task(String),
}

impl From<duckdb::Error> for TelemetryError {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for TelemetryError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl TelemetryError {
    /// Attach table and operation context to a database error.
    pub(crate) fn storage(
        operation: &'static str,
        table: impl Into<String>,
    ) -> impl FnOnce(duckdb::Error) -> Self {
        let table = table.into();
        move |source| Self::Storage {
            operation,
            table,
            source: Box::new(source),
        }
    }

    /// Classify the error so transports can choose a status code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsetMetricType { .. } => ErrorKind::InvalidInput,
            Self::TraceNotFound { .. } => ErrorKind::NotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::MetricsCommit(err) if err.all_cancelled() => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_)
            | Self::Storage { .. }
            | Self::Database(_)
            | Self::JsonDecode { .. }
            | Self::ListDecode { .. }
            | Self::MetricsCommit(_)
            | Self::Task(_) => ErrorKind::Storage,
        }
    }
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The payload had an unsupported or malformed shape.
    InvalidInput,
    /// Underlying read or write failure.
    Storage,
    /// The requested trace does not exist.
    NotFound,
    /// The caller cancelled the operation.
    Cancelled,
    /// The configuration is invalid.
    Config,
}

/// Every failure from a concurrent metrics commit, one per failed table.
#[derive(Debug)]
pub struct MetricsCommitError {
    failures: Vec<TelemetryError>,
}

impl MetricsCommitError {
    pub(crate) fn new(failures: Vec<TelemetryError>) -> Self {
        Self { failures }
    }

    /// The individual failures, in completion order.
    pub fn failures(&self) -> &[TelemetryError] {
        &self.failures
    }

    /// Names of the tables whose insert failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter_map(|err| match err {
                TelemetryError::Storage { table, .. } => Some(table.as_str()),
                _ => None,
            })
            .collect()
    }

    fn all_cancelled(&self) -> bool {
        !self.failures.is_empty()
            && self
                .failures
                .iter()
                .all(|err| matches!(err, TelemetryError::Cancelled))
    }
}

impl fmt::Display for MetricsCommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} metric table(s) failed to commit", self.failures.len())?;
        for (i, err) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MetricsCommitError {}

impl From<TelemetryError> for tonic::Status {
    fn from(err: TelemetryError) -> Self {
        match err.kind() {
            ErrorKind::InvalidInput => Self::invalid_argument(err.to_string()),
            ErrorKind::NotFound => Self::not_found(err.to_string()),
            ErrorKind::Cancelled => Self::cancelled(err.to_string()),
            ErrorKind::Storage | ErrorKind::Config => Self::internal(err.to_string()),
        }
    }
}
