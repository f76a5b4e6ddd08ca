use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Receives a row count each time a batch completes, successful or not.
pub trait ProgressSink: Send + Sync {
    fn rows_processed(&self, rows: usize);
}

/// Discards progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn rows_processed(&self, _rows: usize) {}
}

/// Logs the running total at most once per interval.
pub struct LogProgress {
    label: String,
    interval: Duration,
    total: AtomicU64,
    last_report: Mutex<Instant>,
}

impl LogProgress {
    pub fn new(label: impl Into<String>, interval: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            total: AtomicU64::new(0),
            last_report: Mutex::new(Instant::now()),
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl ProgressSink for LogProgress {
    fn rows_processed(&self, rows: usize) {
        let total = self.total.fetch_add(rows as u64, Ordering::Relaxed) + rows as u64;

        let mut last = self.last_report.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            log::info!("{}: {} rows processed", self.label, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_progress_accumulates() {
        let progress = LogProgress::new("orders.csv", Duration::ZERO);
        progress.rows_processed(500);
        progress.rows_processed(250);
        assert_eq!(progress.total(), 750);
    }
}
