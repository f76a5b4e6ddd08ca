use crate::config::ConfigError;
use crate::import::{MappingError, PoolError, ReadError, SchemaError};
use thiserror::Error;

/// Conditions that stop an import before or outside of batch processing.
///
/// Individual batch failures are not fatal; they are reported in the
/// import summary instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("import task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
