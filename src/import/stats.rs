use super::pool::BatchResult;
use super::upsert::WriteMode;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Failure messages kept for the report; the rest are only counted.
pub const MAX_REPORTED_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub sequence: u64,
    pub rows: usize,
    pub message: String,
}

/// Running totals over batch results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub batches_succeeded: usize,
    pub batches_failed: usize,
    pub rows_attempted: usize,
    /// Rows of successful batches.
    pub rows_written: usize,
    pub rows_affected: u64,
    pub fallbacks: usize,
    pub failures: Vec<BatchFailure>,
}

impl ImportStats {
    pub fn record(&mut self, result: &BatchResult) {
        self.rows_attempted += result.row_count;
        self.fallbacks += result.fallbacks;

        match &result.error {
            None => {
                self.batches_succeeded += 1;
                self.rows_written += result.row_count;
                self.rows_affected += result.rows_affected;
            }
            Some(err) => {
                self.batches_failed += 1;
                if self.failures.len() < MAX_REPORTED_FAILURES {
                    self.failures.push(BatchFailure {
                        sequence: result.sequence,
                        rows: result.row_count,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    pub fn batches_completed(&self) -> usize {
        self.batches_succeeded + self.batches_failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Succeeded,
    CompletedWithErrors,
}

/// Final report for one source file.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub file: String,
    pub table: String,
    pub mode: WriteMode,
    pub skipped_columns: Vec<String>,
    pub batches_submitted: u64,
    #[serde(flatten)]
    pub stats: ImportStats,
    pub elapsed_secs: f64,
    pub rows_per_sec: f64,
    pub read_error: Option<String>,
    pub cancelled: bool,
    /// Set when identity sequences could not be moved past imported values.
    pub sequence_error: Option<String>,
}

impl ImportSummary {
    pub fn status(&self) -> ImportStatus {
        if self.stats.batches_failed > 0
            || self.read_error.is_some()
            || self.cancelled
            || self.sequence_error.is_some()
        {
            ImportStatus::CompletedWithErrors
        } else {
            ImportStatus::Succeeded
        }
    }
}

pub fn throughput(rows: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Import summary: {} -> {}", self.file, self.table)?;
        writeln!(f, "  status:            {:?}", self.status())?;
        writeln!(f, "  mode:              {:?}", self.mode)?;
        writeln!(
            f,
            "  batches:           {} submitted, {} succeeded, {} failed",
            self.batches_submitted, self.stats.batches_succeeded, self.stats.batches_failed
        )?;
        writeln!(
            f,
            "  rows:              {} written of {} read",
            self.stats.rows_written, self.stats.rows_attempted
        )?;
        writeln!(f, "  coercion fallbacks: {}", self.stats.fallbacks)?;
        writeln!(f, "  elapsed:           {:.2}s", self.elapsed_secs)?;
        writeln!(f, "  throughput:        {:.0} rows/sec", self.rows_per_sec)?;

        if !self.skipped_columns.is_empty() {
            writeln!(f, "  skipped columns:   {}", self.skipped_columns.join(", "))?;
        }
        if let Some(err) = &self.read_error {
            writeln!(f, "  read stopped:      {}", err)?;
        }
        if self.cancelled {
            writeln!(f, "  cancelled before completion")?;
        }
        if let Some(err) = &self.sequence_error {
            writeln!(f, "  identity resync:   {}", err)?;
        }
        if !self.stats.failures.is_empty() {
            writeln!(f, "  failures:")?;
            for failure in &self.stats.failures {
                writeln!(
                    f,
                    "    batch {} ({} rows): {}",
                    failure.sequence, failure.rows, failure.message
                )?;
            }
            let unreported = self.stats.batches_failed.saturating_sub(self.stats.failures.len());
            if unreported > 0 {
                writeln!(f, "    ... and {} more", unreported)?;
            }
        }
        Ok(())
    }
}
