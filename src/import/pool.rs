//! Fixed-size pool of batch writers fed through bounded queues.
//!
//! ```text
//! producer --submit--> [jobs: 2 x workers] --> worker 1..N --> [results: 2 x workers] --> consumer
//! ```
//!
//! The job queue blocks the producer when full. Every submitted batch yields
//! exactly one [`BatchResult`]; the result queue closes only after the last
//! worker has exited.

use super::coerce::coerce_row;
use super::error::{PoolError, WriteError};
use super::mapper::ColumnMapping;
use super::reader::Row;
use super::upsert::{BatchWriter, TypedRow};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PoolState {
    Created,
    Running,
    Draining,
    Closed,
}

/// Rows read from the source, tagged with a 1-based sequence number.
#[derive(Debug, Clone)]
pub struct Batch {
    pub sequence: u64,
    pub rows: Vec<Row>,
}

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchResult {
    pub sequence: u64,
    /// Rows in the batch, counted whether or not the write succeeded.
    pub row_count: usize,
    /// Rows the database reported as affected.
    pub rows_affected: u64,
    pub fallbacks: usize,
    pub elapsed: Duration,
    pub error: Option<WriteError>,
}

impl BatchResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

struct Shared<W> {
    writer: W,
    mappings: Vec<ColumnMapping>,
    cancel: CancellationToken,
}

pub struct WorkerPool<W: BatchWriter> {
    workers: usize,
    shared: Arc<Shared<W>>,
    state: Arc<Mutex<PoolState>>,
    jobs_tx: Option<mpsc::Sender<Batch>>,
    jobs_rx: Option<mpsc::Receiver<Batch>>,
    results_tx: Option<mpsc::Sender<BatchResult>>,
    results_rx: Option<mpsc::Receiver<BatchResult>>,
    supervisor: Option<JoinHandle<()>>,
}

impl<W: BatchWriter> WorkerPool<W> {
    /// Allocate the queues. No worker runs until [`WorkerPool::start`].
    pub fn new(
        writer: W,
        mappings: Vec<ColumnMapping>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let capacity = workers * 2;
        let (jobs_tx, jobs_rx) = mpsc::channel(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity);

        Self {
            workers,
            shared: Arc::new(Shared {
                writer,
                mappings,
                cancel,
            }),
            state: Arc::new(Mutex::new(PoolState::Created)),
            jobs_tx: Some(jobs_tx),
            jobs_rx: Some(jobs_rx),
            results_tx: Some(results_tx),
            results_rx: Some(results_rx),
            supervisor: None,
        }
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Launch the workers. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock();
            if *state != PoolState::Created {
                return Err(PoolError::NotRunning(*state));
            }
            *state = PoolState::Running;
        }

        let (Some(jobs_rx), Some(results_tx)) = (self.jobs_rx.take(), self.results_tx.take())
        else {
            return Err(PoolError::Closed);
        };
        let jobs_rx = Arc::new(AsyncMutex::new(jobs_rx));

        let handles: Vec<JoinHandle<()>> = (1..=self.workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&jobs_rx),
                    results_tx.clone(),
                    Arc::clone(&self.shared),
                ))
            })
            .collect();

        let state = Arc::clone(&self.state);
        self.supervisor = Some(tokio::spawn(async move {
            for handle in handles {
                if let Err(err) = handle.await {
                    log::error!("worker task failed: {}", err);
                }
            }
            *state.lock() = PoolState::Closed;
            // Last sender: the consumer sees the end of results only now.
            drop(results_tx);
        }));

        log::debug!("worker pool started with {} workers", self.workers);
        Ok(())
    }

    /// Hand out the result stream. Only the first call returns it.
    pub fn take_results(&mut self) -> Option<mpsc::Receiver<BatchResult>> {
        self.results_rx.take()
    }

    fn sender(&self) -> Result<&mpsc::Sender<Batch>, PoolError> {
        let state = self.state();
        if state != PoolState::Running {
            return Err(PoolError::NotRunning(state));
        }
        self.jobs_tx.as_ref().ok_or(PoolError::Closed)
    }

    /// Queue a batch, waiting while the job queue is full.
    pub async fn submit(&self, batch: Batch) -> Result<(), PoolError> {
        self.sender()?
            .send(batch)
            .await
            .map_err(|_| PoolError::Closed)
    }

    /// Same as [`WorkerPool::submit`] for callers on a blocking thread.
    pub fn blocking_submit(&self, batch: Batch) -> Result<(), PoolError> {
        self.sender()?
            .blocking_send(batch)
            .map_err(|_| PoolError::Closed)
    }

    /// Declare that no more batches will be submitted.
    pub fn done(&mut self) {
        self.jobs_tx.take();

        let mut state = self.state.lock();
        match *state {
            PoolState::Running => *state = PoolState::Draining,
            PoolState::Created => {
                // Never started: nothing will ever produce results.
                self.jobs_rx.take();
                self.results_tx.take();
                *state = PoolState::Closed;
            }
            PoolState::Draining | PoolState::Closed => {}
        }
    }

    /// Wait until every worker has exited.
    pub async fn wait(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(err) = supervisor.await {
                log::error!("worker pool supervisor failed: {}", err);
                *self.state.lock() = PoolState::Closed;
            }
        }
    }
}

async fn run_worker<W: BatchWriter>(
    id: usize,
    jobs: Arc<AsyncMutex<mpsc::Receiver<Batch>>>,
    results: mpsc::Sender<BatchResult>,
    shared: Arc<Shared<W>>,
) {
    loop {
        let next = {
            let mut jobs = jobs.lock().await;
            jobs.recv().await
        };

        let Some(batch) = next else {
            break;
        };

        let result = process_batch(id, batch, &shared).await;
        if results.send(result).await.is_err() {
            log::warn!("worker {}: result consumer went away", id);
            break;
        }
    }

    log::trace!("worker {} exiting", id);
}

async fn process_batch<W: BatchWriter>(id: usize, batch: Batch, shared: &Shared<W>) -> BatchResult {
    let started = Instant::now();
    let row_count = batch.rows.len();

    if shared.cancel.is_cancelled() {
        return BatchResult {
            sequence: batch.sequence,
            row_count,
            rows_affected: 0,
            fallbacks: 0,
            elapsed: started.elapsed(),
            error: Some(WriteError::Cancelled),
        };
    }

    let mut fallbacks = 0;
    let rows: Vec<TypedRow> = batch
        .rows
        .iter()
        .map(|raw| {
            let (row, count) = coerce_row(raw, &shared.mappings);
            fallbacks += count;
            row
        })
        .collect();
    drop(batch.rows);

    let outcome = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => Err(WriteError::Cancelled),
        result = shared.writer.write(rows) => result,
    };

    let elapsed = started.elapsed();
    match outcome {
        Ok(rows_affected) => {
            log::debug!(
                "worker {}: batch {} wrote {} rows in {:?}",
                id,
                batch.sequence,
                row_count,
                elapsed
            );
            BatchResult {
                sequence: batch.sequence,
                row_count,
                rows_affected,
                fallbacks,
                elapsed,
                error: None,
            }
        }
        Err(err) => {
            log::warn!(
                "worker {}: batch {} ({} rows) failed: {}",
                id,
                batch.sequence,
                row_count,
                err
            );
            BatchResult {
                sequence: batch.sequence,
                row_count,
                rows_affected: 0,
                fallbacks,
                elapsed,
                error: Some(err),
            }
        }
    }
}
