use super::catalog::{Catalog, ColumnDescriptor, TableRef};
use super::error::{PoolError, ReadError};
use super::mapper::{ColumnMapping, MapOutcome, map_columns};
use super::pool::{Batch, WorkerPool};
use super::progress::ProgressSink;
use super::reader::{BatchReader, resolve_delimiter};
use super::stats::{ImportStats, ImportSummary, throughput};
use super::upsert::{BatchWriter, PgBatchWriter, WritePlan, resync_identity_sequences};
use crate::config::{IdentityMode, ImportConfig};
use crate::error::ImportError;
use sqlx::PgPool;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// What the pipeline observed while moving batches through the pool.
#[derive(Debug)]
pub struct PipelineReport {
    pub batches_submitted: u64,
    pub stats: ImportStats,
    pub read_error: Option<ReadError>,
    pub cancelled: bool,
}

struct Production<W: BatchWriter> {
    pool: WorkerPool<W>,
    batches_submitted: u64,
    read_error: Option<ReadError>,
}

/// Stream `reader` through a worker pool writing with `writer`.
///
/// Batches are read and submitted on a blocking thread while this task
/// drains results. A malformed record stops reading; batches already
/// submitted still complete and are counted.
pub async fn run_pipeline<R, W>(
    reader: BatchReader<R>,
    mappings: Vec<ColumnMapping>,
    writer: W,
    batch_size: usize,
    workers: usize,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
) -> Result<PipelineReport, ImportError>
where
    R: Read + Send + 'static,
    W: BatchWriter,
{
    let mut pool = WorkerPool::new(writer, mappings, workers, cancel.clone());
    pool.start()?;
    let mut results = pool.take_results().ok_or(PoolError::Closed)?;

    let producer_cancel = cancel.clone();
    let producer = tokio::task::spawn_blocking(move || {
        produce(reader, pool, batch_size.max(1), producer_cancel)
    });

    let mut stats = ImportStats::default();
    while let Some(result) = results.recv().await {
        progress.rows_processed(result.row_count);
        stats.record(&result);
    }

    let mut production = producer.await?;
    production.pool.wait().await;

    Ok(PipelineReport {
        batches_submitted: production.batches_submitted,
        stats,
        read_error: production.read_error,
        cancelled: cancel.is_cancelled(),
    })
}

fn produce<R: Read, W: BatchWriter>(
    mut reader: BatchReader<R>,
    mut pool: WorkerPool<W>,
    batch_size: usize,
    cancel: CancellationToken,
) -> Production<W> {
    let mut batches_submitted = 0;
    let mut read_error = None;

    loop {
        if cancel.is_cancelled() {
            log::warn!(
                "import cancelled, stopped reading after {} batches",
                batches_submitted
            );
            break;
        }

        match reader.read_batch(batch_size) {
            Ok((rows, more)) => {
                if !rows.is_empty() {
                    let batch = Batch {
                        sequence: batches_submitted + 1,
                        rows,
                    };
                    if let Err(err) = pool.blocking_submit(batch) {
                        log::error!("failed to submit batch: {}", err);
                        break;
                    }
                    batches_submitted += 1;
                }
                if !more {
                    break;
                }
            }
            Err(err) => {
                log::error!(
                    "stopped reading after {} records: {}",
                    reader.records_read(),
                    err
                );
                read_error = Some(err);
                break;
            }
        }
    }

    pool.done();
    log::debug!("producer finished: {} batches submitted", batches_submitted);

    Production {
        pool,
        batches_submitted,
        read_error,
    }
}

/// Mapped identity columns whose values should be forced in.
pub fn identity_overrides(mode: IdentityMode, mapped: &[ColumnMapping]) -> Vec<String> {
    match mode {
        IdentityMode::Off => Vec::new(),
        IdentityMode::On | IdentityMode::Auto => {
            let mut columns: Vec<String> = Vec::new();
            for mapping in mapped.iter().filter(|m| m.column.is_identity) {
                if !columns.contains(&mapping.column.name) {
                    columns.push(mapping.column.name.clone());
                }
            }
            columns
        }
    }
}

/// Everything resolved before the first row is read.
#[derive(Debug)]
pub struct PreparedImport {
    pub table: TableRef,
    pub columns: Vec<ColumnDescriptor>,
    pub mapping: MapOutcome,
    pub key_columns: Vec<String>,
    pub identity_columns: Vec<String>,
}

/// Runs imports against one destination database.
#[derive(Clone)]
pub struct Importer {
    pool: PgPool,
    catalog: Catalog,
}

impl Importer {
    pub fn new(pool: PgPool) -> Self {
        let catalog = Catalog::new(pool.clone());
        Self { pool, catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve the table, map `headers` and pick keys without writing anything.
    pub async fn prepare(
        &self,
        headers: &[String],
        config: &ImportConfig,
    ) -> Result<PreparedImport, ImportError> {
        let requested = TableRef::parse(&config.table)?;
        let table = self.catalog.resolve_table(&requested).await?;
        let columns = self.catalog.columns(&table).await?;

        let mapping = map_columns(headers, &columns)?;
        for header in &mapping.skipped {
            log::warn!("skipping source column '{}': not in {}", header, table);
        }
        for column in mapping.duplicate_targets() {
            log::warn!(
                "column {} is fed by more than one source header; every batch will write it twice",
                column
            );
        }

        let keys = match &config.key_columns {
            Some(keys) => keys.clone(),
            None => self.catalog.key_columns(&table).await?,
        };
        let key_columns = mapping.resolve_keys(&keys)?;
        let identity_columns = identity_overrides(config.identity, &mapping.mapped);

        if config.identity == IdentityMode::On && identity_columns.is_empty() {
            log::info!("identity override requested but no identity column is mapped");
        }

        Ok(PreparedImport {
            table,
            columns,
            mapping,
            key_columns,
            identity_columns,
        })
    }

    /// Import one delimited file into `config.table`.
    ///
    /// Schema, mapping and key problems fail before any write. Once batches
    /// flow, individual batch failures end up in the summary.
    pub async fn import_file(
        &self,
        path: &Path,
        config: &ImportConfig,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ImportSummary, ImportError> {
        config.validate()?;
        let started = Instant::now();

        let reader = BatchReader::open(path, resolve_delimiter(path, config.delimiter))?;
        let prepared = self.prepare(reader.headers(), config).await?;

        let plan = WritePlan::new(
            prepared.table.clone(),
            prepared.mapping.destination_columns(),
            prepared.key_columns.clone(),
            prepared.identity_columns.clone(),
        );
        let mode = plan.mode();
        let writer = PgBatchWriter::new(self.pool.clone(), plan, config.batch_timeout)
            .with_synchronous_commit(config.synchronous_commit);

        log::info!(
            "importing {} into {} ({:?}, {} columns, keys [{}], batch size {}, {} workers)",
            path.display(),
            prepared.table,
            mode,
            prepared.mapping.mapped.len(),
            prepared.key_columns.join(", "),
            config.batch_size,
            config.workers
        );

        let report = run_pipeline(
            reader,
            prepared.mapping.mapped,
            writer,
            config.batch_size,
            config.workers,
            progress,
            cancel,
        )
        .await?;

        let mut sequence_error = None;
        if !prepared.identity_columns.is_empty() && report.stats.rows_written > 0 {
            if let Err(err) = resync_identity_sequences(
                &self.pool,
                &prepared.table,
                &prepared.identity_columns,
            )
            .await
            {
                log::error!("failed to resync identity sequences of {}: {}", prepared.table, err);
                sequence_error = Some(err.to_string());
            }
        }

        let elapsed = started.elapsed();
        let summary = ImportSummary {
            file: path.display().to_string(),
            table: prepared.table.to_string(),
            mode,
            skipped_columns: prepared.mapping.skipped,
            batches_submitted: report.batches_submitted,
            rows_per_sec: throughput(report.stats.rows_written, elapsed),
            stats: report.stats,
            elapsed_secs: elapsed.as_secs_f64(),
            read_error: report.read_error.map(|err| err.to_string()),
            cancelled: report.cancelled,
            sequence_error,
        };

        log::info!(
            "import of {} finished: {} rows written, {} of {} batches failed in {:.2}s",
            summary.file,
            summary.stats.rows_written,
            summary.stats.batches_failed,
            summary.batches_submitted,
            summary.elapsed_secs
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::catalog::ColumnDescriptor;

    fn mapping(name: &str, is_identity: bool) -> ColumnMapping {
        ColumnMapping::new(
            0,
            name.to_string(),
            ColumnDescriptor {
                name: name.to_string(),
                data_type: "bigint".to_string(),
                nullable: false,
                ordinal: 1,
                is_identity,
            },
        )
    }

    #[test]
    fn identity_override_follows_mode() {
        let mapped = vec![mapping("id", true), mapping("qty", false)];

        assert_eq!(identity_overrides(IdentityMode::Auto, &mapped), vec!["id"]);
        assert_eq!(identity_overrides(IdentityMode::On, &mapped), vec!["id"]);
        assert!(identity_overrides(IdentityMode::Off, &mapped).is_empty());
        assert!(identity_overrides(IdentityMode::Auto, &mapped[1..]).is_empty());
    }
}
