use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GrepaiError, Result};

/// Cooperative cancellation flag shared across the pipeline.
///
/// Clones observe the same flag. Long operations call `checkpoint` at I/O
/// boundaries and between batches.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(GrepaiError::Cancelled)
        } else {
            Ok(())
        }
    }
}
