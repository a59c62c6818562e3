//! Cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DriftError, Result};

/// Cheap clonable cancellation flag, checked at computation granularity.
///
/// Cancellation is cooperative: long-running diff computations and filter
/// evaluations poll the token between items. Once a batch has begun
/// applying to a tree it always completes; the token is only consulted
/// before application starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Err(`Cancelled`) once the token has been cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(DriftError::Cancelled)
        } else {
            Ok(())
        }
    }
}
