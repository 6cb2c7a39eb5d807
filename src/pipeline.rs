//! Metrics upload pipeline
//!
//! Ties collection, staging, and dispatch together behind one entry point
//! that never fails its caller: after a build completes, the orchestrator
//! hands the metrics roots to [`MetricsUploader::upload`] and moves on.
//! Internal stages return `Result`s; at this outer edge every failure is
//! converted into a single report through the configured [`FailureHook`],
//! which decides whether it is fatal (verification) or a logged warning
//! (production).

use std::path::PathBuf;
use std::sync::Arc;

use crate::collect::collect_files;
use crate::config::UploadConfig;
use crate::dispatch::{Dispatcher, UploadMode};
use crate::invocation::UploadInvocation;
use crate::report::FailureHook;
use crate::stage::{default_temp_dir_provider, Stager, TempDirProvider};

/// The metrics upload pipeline.
///
/// Owns the configuration, the staging-directory allocator, and the failure
/// hook; all three are injectable so tests control behavior
/// deterministically. Each call to [`upload`](Self::upload) gets its own
/// staging directory, so concurrent invocations do not contend.
pub struct MetricsUploader {
    config: UploadConfig,
    temp_dir: TempDirProvider,
    hook: Arc<FailureHook>,
}

impl MetricsUploader {
    /// Create an uploader with the default allocator and a logging hook
    pub fn new(config: UploadConfig) -> Self {
        Self {
            config,
            temp_dir: default_temp_dir_provider(),
            hook: Arc::new(FailureHook::logging()),
        }
    }

    /// Replace the staging-directory allocator
    pub fn with_temp_dir_provider(mut self, provider: TempDirProvider) -> Self {
        self.temp_dir = provider;
        self
    }

    /// Replace the failure hook
    pub fn with_failure_hook(mut self, hook: Arc<FailureHook>) -> Self {
        self.hook = hook;
        self
    }

    /// The failure hook failures are reported through
    pub fn failure_hook(&self) -> &Arc<FailureHook> {
        &self.hook
    }

    /// Upload the metrics files found beneath `roots`.
    ///
    /// Roots may be directories (walked recursively) or individual files.
    /// The call is a no-op when no uploader is configured or nothing is
    /// found. Failures are reported through the failure hook, never
    /// returned; in detached mode the caller does not wait for the uploader
    /// to finish.
    pub fn upload(&self, roots: &[PathBuf], mode: UploadMode) {
        if !self.config.is_enabled() {
            return;
        }

        let mut invocation =
            UploadInvocation::new(mode, self.config.build_timestamp().to_string());

        let outcome = collect_files(roots);
        for err in &outcome.errors {
            eprintln!("[metrics-upload] {}", err);
        }
        if outcome.files.is_empty() {
            let _ = invocation.mark_skipped();
            self.persist(&invocation);
            return;
        }

        let stager = Stager::new(self.config.out_dir().to_path_buf())
            .with_provider(Arc::clone(&self.temp_dir));
        let staging = match stager.stage(&outcome.files) {
            Ok(area) => area,
            Err(err) => {
                let _ = invocation.fail(err.to_string());
                self.persist(&invocation);
                self.hook.report(err.into());
                return;
            }
        };

        let _ = invocation.mark_staged(staging.files());
        let _ = invocation.mark_dispatching();

        let dispatcher = Dispatcher::new(
            self.config.uploader().to_string(),
            self.config.environment().clone(),
            self.config.out_dir().to_path_buf(),
            Arc::clone(&self.hook),
        );
        if let Err(err) = dispatcher.dispatch(invocation, staging, mode) {
            self.hook.report(err.into());
        }
    }

    fn persist(&self, invocation: &UploadInvocation) {
        if let Err(err) = invocation.persist(self.config.out_dir()) {
            eprintln!(
                "[metrics-upload] failed to write invocation receipt: {}",
                err
            );
        }
    }
}
