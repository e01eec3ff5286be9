//
// cancel.rs
// Dicom-Transform-rs
//
// One-way cancellation signal shared by the interrupt handler and every transform worker.
//
// Thales Matheus Mendonça Santos - November 2025

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once, read by many. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
