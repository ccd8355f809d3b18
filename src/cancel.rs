//! Cooperative cancellation for long-running operations.
//!
//! Ingestion loops, reindexing, and optimization check a [`CancelToken`]
//! between batches. Cancellation never interrupts a batch mid-flight:
//! partial documents are rolled back by the caller and reindex stops at
//! the last persisted checkpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::{Result, StashError};

/// Cloneable cancellation handle shared between an operation and its owner.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(StashError::Cancelled)` once cancellation was requested.
    /// Call this at batch boundaries.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StashError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_live_and_latches() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(StashError::Cancelled)));
        // Still cancelled after a second call.
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }
}
