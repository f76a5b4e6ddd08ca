use super::mapper::MapOutcome;
use super::pool::PoolState;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while resolving a destination table from the catalog.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
    #[error("table {0} not found or has no columns")]
    TableNotFound(String),
    #[error("catalog query timed out after {0:?}")]
    Timeout(Duration),
    #[error("catalog query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures while pairing source headers with destination columns.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("required columns missing from source: {}", .columns.join(", "))]
    UnmatchedRequired {
        columns: Vec<String>,
        outcome: Box<MapOutcome>,
    },
    #[error("no source columns match the destination table")]
    NoMappedColumns,
    #[error("key columns not present in the mapped source columns: {}", .columns.join(", "))]
    KeyNotMapped { columns: Vec<String> },
}

/// Failures while reading the delimited source file.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read header row: {source}")]
    Header {
        #[source]
        source: csv::Error,
    },
    #[error("source has no header row")]
    MissingHeader,
    #[error("malformed record{}: {source}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Parse {
        line: Option<u64>,
        #[source]
        source: csv::Error,
    },
}

impl ReadError {
    pub(crate) fn parse(source: csv::Error) -> Self {
        let line = source.position().map(|pos| pos.line());
        ReadError::Parse { line, source }
    }
}

/// Failures while writing a single batch. Each one fails only its own batch.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("batch timed out after {0:?}")]
    Timeout(Duration),
    #[error("import cancelled before the batch was written")]
    Cancelled,
}

/// Misuse of the worker pool lifecycle.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is {0:?}, not running")]
    NotRunning(PoolState),
    #[error("worker pool job queue is closed")]
    Closed,
}
