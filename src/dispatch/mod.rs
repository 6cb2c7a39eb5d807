//! Uploader process dispatch
//!
//! Launches the site-configured uploader against the staged copies. In
//! synchronous mode the caller blocks until the uploader exits; in detached
//! mode the launch and wait happen on a background thread so build
//! completion is never delayed by metrics upload. The staging area is
//! released once the uploader has been launched: after exit when
//! synchronous, immediately after the spawn attempt when detached (the
//! uploader contract requires it to read or copy what it needs before
//! returning control). Both modes share one launch path; strictness is a
//! property of the failure handler, not a second code path.

use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::config::Environment;
use crate::invocation::UploadInvocation;
use crate::report::FailureHook;
use crate::stage::StagingArea;

/// How the uploader is launched relative to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadMode {
    /// Block until the uploader exits
    Synchronous,
    /// Launch and wait on a background thread; the caller does not block
    Detached,
}

/// Errors for uploader dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to launch uploader {uploader}: {source}")]
    Spawn {
        uploader: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to await uploader {uploader}: {source}")]
    Wait {
        uploader: String,
        #[source]
        source: io::Error,
    },

    #[error("uploader {uploader} exited with {status}")]
    UploaderFailed { uploader: String, status: ExitStatus },
}

/// Launches the uploader against a staging area and records the outcome.
#[derive(Clone)]
pub struct Dispatcher {
    uploader: String,
    environment: Environment,
    receipt_dir: PathBuf,
    hook: Arc<FailureHook>,
}

impl Dispatcher {
    /// Create a dispatcher for the given uploader executable
    pub fn new(
        uploader: String,
        environment: Environment,
        receipt_dir: PathBuf,
        hook: Arc<FailureHook>,
    ) -> Self {
        Self {
            uploader,
            environment,
            receipt_dir,
            hook,
        }
    }

    /// Launch the uploader against the staged files.
    ///
    /// Synchronous mode returns the dispatch outcome for the caller to
    /// report. Detached mode returns immediately; the background thread
    /// reports its own failures through the failure hook. In both modes the
    /// staging area is removed by the time the invocation reaches a
    /// terminal phase.
    pub fn dispatch(
        &self,
        invocation: UploadInvocation,
        staging: StagingArea,
        mode: UploadMode,
    ) -> Result<(), DispatchError> {
        // No uploader or nothing staged: release the staging area without
        // spawning anything.
        if self.uploader.is_empty() || staging.files().is_empty() {
            let mut invocation = invocation;
            let mut staging = staging;
            staging.remove();
            let _ = invocation.complete();
            self.persist(&invocation);
            return Ok(());
        }

        match mode {
            UploadMode::Synchronous => self.execute(invocation, staging, false),
            UploadMode::Detached => {
                let dispatcher = self.clone();
                thread::spawn(move || {
                    if let Err(err) = dispatcher.execute(invocation, staging, true) {
                        dispatcher.hook.report(err.into());
                    }
                });
                Ok(())
            }
        }
    }

    /// Spawn the uploader, wait for it, and finish the invocation record.
    ///
    /// With `release_after_launch` the staging area is removed as soon as
    /// the spawn attempt resolves, before waiting on the child; otherwise it
    /// is removed after the child exits. Either way no exit path leaves the
    /// staging directory behind.
    fn execute(
        &self,
        mut invocation: UploadInvocation,
        mut staging: StagingArea,
        release_after_launch: bool,
    ) -> Result<(), DispatchError> {
        let spawned = self.command(&staging).spawn();
        if release_after_launch {
            staging.remove();
        }

        let result = match spawned {
            Ok(mut child) => match child.wait() {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(DispatchError::UploaderFailed {
                    uploader: self.uploader.clone(),
                    status,
                }),
                Err(source) => Err(DispatchError::Wait {
                    uploader: self.uploader.clone(),
                    source,
                }),
            },
            Err(source) => Err(DispatchError::Spawn {
                uploader: self.uploader.clone(),
                source,
            }),
        };
        staging.remove();

        match &result {
            Ok(()) => {
                let _ = invocation.complete();
            }
            Err(err) => {
                let _ = invocation.fail(err.to_string());
            }
        }
        self.persist(&invocation);

        result
    }

    /// Best-effort receipt write; there is no caller to hand the error to.
    fn persist(&self, invocation: &UploadInvocation) {
        if let Err(err) = invocation.persist(&self.receipt_dir) {
            eprintln!(
                "[metrics-upload] failed to write invocation receipt: {}",
                err
            );
        }
    }

    /// Build the uploader command: staged paths as arguments, build
    /// environment layered over the inherited one, no stdin.
    fn command(&self, staging: &StagingArea) -> Command {
        let mut cmd = Command::new(&self.uploader);
        cmd.args(staging.staged_paths())
            .stdin(Stdio::null());
        for (key, value) in self.environment.iter() {
            cmd.env(key, value);
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{UploadPhase, RECEIPT_FILENAME};
    use crate::stage::Stager;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn staged_area(out: &Path, contents: &[(&str, &str)]) -> StagingArea {
        let src_dir = out.join("src");
        fs::create_dir_all(&src_dir).unwrap();
        let files: Vec<_> = contents
            .iter()
            .map(|(name, data)| {
                let path = src_dir.join(name);
                fs::write(&path, data).unwrap();
                path
            })
            .collect();
        Stager::new(out.to_path_buf()).stage(&files).unwrap()
    }

    fn dispatching_invocation(mode: UploadMode) -> UploadInvocation {
        let mut invocation = UploadInvocation::new(mode, "1700000000000".to_string());
        invocation.mark_staged(&[]).unwrap();
        invocation.mark_dispatching().unwrap();
        invocation
    }

    fn read_receipt(dir: &Path) -> UploadInvocation {
        let json = fs::read_to_string(dir.join(RECEIPT_FILENAME)).unwrap();
        UploadInvocation::from_json(&json).unwrap()
    }

    #[test]
    fn test_sync_dispatch_success() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[("f1", "data")]);
        let staging_dir = staging.dir().to_path_buf();

        let dispatcher = Dispatcher::new(
            "true".to_string(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::new(FailureHook::silent()),
        );
        let invocation = dispatching_invocation(UploadMode::Synchronous);

        dispatcher
            .dispatch(invocation, staging, UploadMode::Synchronous)
            .unwrap();

        assert!(!staging_dir.exists());
        assert_eq!(read_receipt(out.path()).phase, UploadPhase::Completed);
    }

    #[test]
    fn test_sync_dispatch_nonzero_exit() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[("f1", "data")]);
        let staging_dir = staging.dir().to_path_buf();

        let dispatcher = Dispatcher::new(
            "false".to_string(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::new(FailureHook::silent()),
        );
        let invocation = dispatching_invocation(UploadMode::Synchronous);

        let err = dispatcher
            .dispatch(invocation, staging, UploadMode::Synchronous)
            .unwrap_err();

        assert!(matches!(err, DispatchError::UploaderFailed { .. }));
        assert!(!staging_dir.exists());

        let receipt = read_receipt(out.path());
        assert_eq!(receipt.phase, UploadPhase::Failed);
        assert!(receipt.error.unwrap().contains("exited with"));
    }

    #[test]
    fn test_sync_dispatch_spawn_error() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[("f1", "data")]);
        let staging_dir = staging.dir().to_path_buf();

        let missing = out.path().join("no_such_uploader");
        let dispatcher = Dispatcher::new(
            missing.display().to_string(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::new(FailureHook::silent()),
        );
        let invocation = dispatching_invocation(UploadMode::Synchronous);

        let err = dispatcher
            .dispatch(invocation, staging, UploadMode::Synchronous)
            .unwrap_err();

        assert!(matches!(err, DispatchError::Spawn { .. }));
        assert!(err.to_string().contains("failed to launch"));
        assert!(!staging_dir.exists());
    }

    #[test]
    fn test_detached_dispatch_returns_immediately_and_cleans_up() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[("f1", "data")]);
        let staging_dir = staging.dir().to_path_buf();

        let hook = Arc::new(FailureHook::silent());
        let dispatcher = Dispatcher::new(
            "true".to_string(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::clone(&hook),
        );
        let invocation = dispatching_invocation(UploadMode::Detached);

        dispatcher
            .dispatch(invocation, staging, UploadMode::Detached)
            .unwrap();

        // The background thread removes the staging area and writes the
        // receipt; poll for it.
        for _ in 0..100 {
            if !staging_dir.exists() && out.path().join(RECEIPT_FILENAME).exists() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!staging_dir.exists());
        assert_eq!(read_receipt(out.path()).phase, UploadPhase::Completed);
        assert!(!hook.has_failures());
    }

    #[test]
    fn test_empty_uploader_is_noop_success() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[("f1", "data")]);
        let staging_dir = staging.dir().to_path_buf();

        let dispatcher = Dispatcher::new(
            String::new(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::new(FailureHook::silent()),
        );
        let invocation = dispatching_invocation(UploadMode::Synchronous);

        dispatcher
            .dispatch(invocation, staging, UploadMode::Synchronous)
            .unwrap();

        assert!(!staging_dir.exists());
        assert_eq!(read_receipt(out.path()).phase, UploadPhase::Completed);
    }

    #[test]
    fn test_empty_staging_spawns_nothing() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[]);
        let staging_dir = staging.dir().to_path_buf();

        // A missing uploader would fail to spawn; the empty staging area
        // short-circuits before any spawn is attempted.
        let dispatcher = Dispatcher::new(
            out.path().join("no_such_uploader").display().to_string(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::new(FailureHook::silent()),
        );
        let invocation = dispatching_invocation(UploadMode::Synchronous);

        dispatcher
            .dispatch(invocation, staging, UploadMode::Synchronous)
            .unwrap();

        assert!(!staging_dir.exists());
    }

    #[test]
    fn test_detached_dispatch_reports_failure_through_hook() {
        let out = TempDir::new().unwrap();
        let staging = staged_area(out.path(), &[("f1", "data")]);

        let hook = Arc::new(FailureHook::silent());
        let dispatcher = Dispatcher::new(
            "false".to_string(),
            Environment::new(),
            out.path().to_path_buf(),
            Arc::clone(&hook),
        );
        let invocation = dispatching_invocation(UploadMode::Detached);

        dispatcher
            .dispatch(invocation, staging, UploadMode::Detached)
            .unwrap();

        for _ in 0..100 {
            if hook.has_failures() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(hook.failure_count(), 1);
        assert_eq!(read_receipt(out.path()).phase, UploadPhase::Failed);
    }
}
