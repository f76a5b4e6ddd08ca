//! Concurrent bulk import of delimited files into PostgreSQL tables.
//!
//! 1. **Catalog** (`catalog`) - Resolves the destination table, its columns and primary key
//! 2. **Mapping** (`mapper`) - Pairs source headers with destination columns by name
//! 3. **Reading** (`reader`) - Streams the source file in fixed-size batches
//! 4. **Coercion** (`coerce`) - Converts raw text per destination column type
//! 5. **Writing** (`upsert`, `statement`) - One transaction per batch: COPY, optionally staged and merged
//! 6. **Concurrency** (`pool`, `pipeline`) - Bounded queues between reader, workers and aggregation
//! 7. **Reporting** (`stats`, `progress`) - Per-batch accounting rolled into an import summary
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use bulk_loader::config::ImportConfig;
//! use bulk_loader::import::{Importer, NoProgress};
//!
//! let importer = Importer::new(pool);
//! let summary = importer
//!     .import_file(path, &ImportConfig::new("dbo.shipping"), Arc::new(NoProgress), cancel)
//!     .await?;
//!
//! println!("{summary}");
//! ```

pub mod catalog;
pub mod coerce;
pub mod error;
pub mod mapper;
pub mod pg_config;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod reader;
pub mod statement;
pub mod stats;
pub mod upsert;

pub use catalog::{Catalog, ColumnDescriptor, TableRef};
pub use coerce::{TypeClass, Value};
pub use error::{MappingError, PoolError, ReadError, SchemaError, WriteError};
pub use mapper::{ColumnMapping, MapOutcome, map_columns};
pub use pipeline::{Importer, PipelineReport, PreparedImport, run_pipeline};
pub use pool::{Batch, BatchResult, PoolState, WorkerPool};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use reader::{BatchReader, Row};
pub use stats::{ImportStats, ImportStatus, ImportSummary};
pub use upsert::{BatchWriter, PgBatchWriter, TypedRow, WriteMode, WritePlan};
