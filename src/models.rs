//
// models.rs
// Dicom-Transform-rs
//
// Per-file outcomes and the run summary reported once every worker has stopped.
//
// Thales Matheus Mendonça Santos - November 2025

use std::sync::atomic::{AtomicUsize, Ordering};

/// What happened to one input file that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Script ran and the file was saved in place.
    Transformed,
    /// DICOMDIR index removed without running the script.
    Deleted,
}

/// Totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub transformed: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Workers that could not load the script and processed nothing.
    pub failed_workers: usize,
    pub workers: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn all_workers_failed(&self) -> bool {
        self.workers > 0 && self.failed_workers == self.workers
    }
}

/// Lock-free counters the workers update while running.
#[derive(Debug, Default)]
pub(crate) struct SummaryCounters {
    transformed: AtomicUsize,
    deleted: AtomicUsize,
    failed: AtomicUsize,
    failed_workers: AtomicUsize,
}

impl SummaryCounters {
    pub(crate) fn record(&self, outcome: FileOutcome) {
        let counter = match outcome {
            FileOutcome::Transformed => &self.transformed,
            FileOutcome::Deleted => &self.deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_worker(&self) {
        self.failed_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish(self, workers: usize, cancelled: bool) -> RunSummary {
        RunSummary {
            transformed: self.transformed.into_inner(),
            deleted: self.deleted.into_inner(),
            failed: self.failed.into_inner(),
            failed_workers: self.failed_workers.into_inner(),
            workers,
            cancelled,
        }
    }
}
