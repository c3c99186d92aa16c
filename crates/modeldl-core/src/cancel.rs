//! Cooperative cancellation token shared across the fetcher, driver, and
//! coordinator so one `cancel(repoId)` call reliably stops every task
//! working on that download's behalf.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token for cooperative cancellation of async operations.
/// Clones share state: cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation and return an error if cancelled; convenience for
    /// loops that need to bail out early.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::DownloadError::Cancellation)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_not_cancelled() {
        assert!(!CancellationToken::new().is_cancelled());
    }

    #[test]
    fn cancel_is_observed_by_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn check_returns_cancellation_error() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(token.check(), Err(crate::DownloadError::Cancellation)));
    }
}
