//! Run-scoped cancellation.
//!
//! A [`RunContext`] is cloned into every worker and every in-flight request.
//! The first call to [`RunContext::cancel`] records why the run stopped;
//! later calls only re-trigger the (already cancelled) token.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// The run-level deadline elapsed
    Deadline,
    /// SIGINT / SIGTERM
    Interrupt,
    /// Cancelled programmatically by the caller
    Requested,
    /// A worker task panicked; the remaining workers are stopped
    WorkerPanicked,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Deadline => f.write_str("run deadline exceeded"),
            CancelCause::Interrupt => f.write_str("interrupted by signal"),
            CancelCause::Requested => f.write_str("cancelled by caller"),
            CancelCause::WorkerPanicked => f.write_str("worker task panicked"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The first recorded cause, if the run was cancelled.
    pub fn cause(&self) -> Option<CancelCause> {
        self.cause.get().copied()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Completes once the run is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
