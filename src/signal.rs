//! Cooperative cancellation.
//!
//! The compiler checks the signal at phase boundaries only: before the
//! transform phase and before the packaging phase. A plugin call already in
//! flight is allowed to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, TapeError};

/// Owner side. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortController {
    aborted: Arc<AtomicBool>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            aborted: Arc::clone(&self.aborted),
        }
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }
}

/// Observer side handed to [`crate::Config`].
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// `Err(TapeError::Aborted)` once the controller has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(TapeError::Aborted)
        } else {
            Ok(())
        }
    }
}
