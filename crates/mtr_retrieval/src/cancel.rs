use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mtr_core::error::AppError;

/// Cooperative cancellation for long scans.
///
/// Clones share the same flag, so any holder can stop a search running on
/// another thread. An optional deadline cancels implicitly once it passes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    stop_requested: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            stop_requested: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            stop_requested: Arc::new(AtomicBool::new(false)),
            // An unrepresentable deadline is treated as "never".
            deadline: now.checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.stop_requested.load(Ordering::Acquire) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn check(&self) -> Result<(), AppError> {
        if self.is_cancelled() {
            return Err(AppError::cancelled());
        }
        Ok(())
    }
}
