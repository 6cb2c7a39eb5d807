//! Metrics upload sidecar for build orchestration
//!
//! After a build completes, this crate locates emitted metrics files, stages
//! copies of them in an ephemeral directory, and hands the copies to a
//! site-configured uploader executable — without ever letting an upload
//! failure break the build that produced the metrics.

pub mod collect;
pub mod config;
pub mod dispatch;
pub mod invocation;
pub mod pipeline;
pub mod report;
pub mod stage;

pub use collect::{collect_files, CollectOutcome};
pub use config::{ConfigError, Environment, SiteConfig, UploadConfig};
pub use dispatch::{DispatchError, Dispatcher, UploadMode};
pub use invocation::{UploadInvocation, UploadPhase};
pub use pipeline::MetricsUploader;
pub use report::{FailureHook, UploadError};
pub use stage::{default_temp_dir_provider, StageError, StagedFile, StagingArea, Stager, TempDirProvider};
