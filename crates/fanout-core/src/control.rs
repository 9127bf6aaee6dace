//! Cancellation for runs and individual jobs.
//!
//! A `CancelToken` is a shared flag. The scheduler checks the run token on every
//! step and aborts (with cleanup) once it is set; each job also gets its own token
//! that the pool raises when the job's worker is retired after a timeout or during
//! shutdown. Units of work observe it through `JobContext::is_cancelled`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag. All clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
