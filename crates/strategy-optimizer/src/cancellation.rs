use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::OptimizerError;

/// Cooperative cancellation flag shared between a caller and a running optimization.
///
/// Checked between batches, generations and iterations, before each candidate,
/// and once per simulated day inside the engine.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), OptimizerError> {
        if self.is_cancelled() {
            Err(OptimizerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The raw flag, for handing to the backtest engine's run limits.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(OptimizerError::Cancelled)));
        assert!(token.flag().load(Ordering::Relaxed));
    }
}
