use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, RioError};

/// cooperative cancellation token
///
/// cloned freely; all clones observe the same flag. the pipelines check it
/// at every tar entry boundary and every placement step.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// flip the token; all holders observe cancellation at their next check
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// error out if cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RioError::Cancelled)
        } else {
            Ok(())
        }
    }
}
