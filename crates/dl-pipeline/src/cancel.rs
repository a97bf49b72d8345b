//! Cooperative cancellation checked between phases.

use crate::error::{PipelineError, PipelineResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`PipelineError::Cancelled`] once the flag is set
    pub fn check(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(flag.check().is_ok());
        other.cancel();
        assert!(flag.is_cancelled());
        assert_eq!(flag.check().unwrap_err().to_string(), "[P002] run cancelled");
    }
}
