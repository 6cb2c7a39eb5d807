//! Failure reporting channel
//!
//! Internal stages return `Result`s; the pipeline converts each failure into
//! a classified `UploadError` and hands it to the registered handler. The
//! handler decides what a failure means: production installs a logging
//! handler that swallows the error so a build never fails because telemetry
//! upload failed, while verification callers check the failure count (or
//! install their own handler) to turn the same error fatal.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dispatch::DispatchError;
use crate::stage::StageError;

/// Classified top-level upload failure
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Staging(#[from] StageError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Handler invoked with every classified failure
pub type FailureHandler = Box<dyn Fn(&UploadError) + Send + Sync>;

/// Failure sink for one uploader instance.
///
/// Every failure raised anywhere in the pipeline, including on the detached
/// dispatch thread, arrives here exactly once. The hook counts reports so a
/// strict caller can inspect the outcome after the fact.
pub struct FailureHook {
    handler: FailureHandler,
    failures: AtomicUsize,
}

impl FailureHook {
    /// Create a hook with a custom handler
    pub fn new(handler: FailureHandler) -> Self {
        Self {
            handler,
            failures: AtomicUsize::new(0),
        }
    }

    /// Hook that reports failures to stderr and swallows them
    pub fn logging() -> Self {
        Self::new(Box::new(|err| {
            eprintln!("[metrics-upload] upload failed: {}", err);
        }))
    }

    /// Hook that only counts failures
    pub fn silent() -> Self {
        Self::new(Box::new(|_| {}))
    }

    /// Deliver a failure to the registered handler
    pub fn report(&self, err: UploadError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        (self.handler)(&err);
    }

    /// Number of failures reported so far
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Whether any failure has been reported
    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}

impl Default for FailureHook {
    fn default() -> Self {
        Self::logging()
    }
}

impl fmt::Debug for FailureHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureHook")
            .field("failures", &self.failure_count())
            .finish()
    }
}
