//! Upload invocation record
//!
//! One record per upload attempt, tracking the phase state machine
//! COLLECTING → {STAGED | SKIPPED} → DISPATCHING → {COMPLETED | FAILED}
//! along with the staged file set and any failure. The record is persisted
//! as a JSON receipt in the build output directory when it reaches a
//! terminal phase, so an operator can see what the last upload attempt did
//! without digging through build logs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::UploadMode;
use crate::stage::StagedFile;

/// Schema version for the invocation receipt
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "metrics-uplink/upload_invocation@1";

/// File name of the receipt written into the output directory
pub const RECEIPT_FILENAME: &str = "upload_invocation.json";

/// Phase of an upload invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadPhase {
    /// Discovering metrics files beneath the roots
    Collecting,
    /// Files copied into the staging area
    Staged,
    /// Nothing to do: no uploader configured or no files found
    Skipped,
    /// Uploader launched (or launching)
    Dispatching,
    /// Uploader exited successfully
    Completed,
    /// Staging or dispatch failed
    Failed,
}

impl UploadPhase {
    /// Whether this phase ends the invocation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadPhase::Skipped | UploadPhase::Completed | UploadPhase::Failed
        )
    }

    /// Check if a transition from this phase to `target` is valid
    pub fn can_transition_to(&self, target: UploadPhase) -> bool {
        match (self, target) {
            (UploadPhase::Collecting, UploadPhase::Staged) => true,
            (UploadPhase::Collecting, UploadPhase::Skipped) => true,
            // Staging failures abort before STAGED is ever entered.
            (UploadPhase::Collecting, UploadPhase::Failed) => true,

            (UploadPhase::Staged, UploadPhase::Dispatching) => true,
            (UploadPhase::Staged, UploadPhase::Failed) => true,

            (UploadPhase::Dispatching, UploadPhase::Completed) => true,
            (UploadPhase::Dispatching, UploadPhase::Failed) => true,

            // Terminal phases cannot transition
            _ => false,
        }
    }
}

/// A staged file as recorded in the receipt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedFileRecord {
    /// Base name of the copy in the staging directory
    pub name: String,
    /// Original source path
    pub source: String,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the staged bytes
    pub sha256: String,
}

impl From<&StagedFile> for StagedFileRecord {
    fn from(file: &StagedFile) -> Self {
        Self {
            name: file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source: file.source.display().to_string(),
            size: file.size,
            sha256: file.sha256.clone(),
        }
    }
}

/// Errors for invocation record operations
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition { from: UploadPhase, to: UploadPhase },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Record of one upload attempt (upload_invocation.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInvocation {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Invocation identifier
    pub invocation_id: String,

    /// Build timestamp identifier from the build configuration
    pub build_timestamp: String,

    /// Dispatch mode for this invocation
    pub mode: UploadMode,

    /// Current phase
    pub phase: UploadPhase,

    /// When the invocation started
    pub created_at: DateTime<Utc>,

    /// When the phase last changed
    pub updated_at: DateTime<Utc>,

    /// Files copied into the staging area
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub staged_files: Vec<StagedFileRecord>,

    /// Failure message when the invocation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadInvocation {
    /// Create a new invocation in the COLLECTING phase
    pub fn new(mode: UploadMode, build_timestamp: String) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            invocation_id: new_invocation_id(),
            build_timestamp,
            mode,
            phase: UploadPhase::Collecting,
            created_at: now,
            updated_at: now,
            staged_files: Vec::new(),
            error: None,
        }
    }

    /// Transition to a new phase
    pub fn transition(&mut self, target: UploadPhase) -> Result<(), InvocationError> {
        if !self.phase.can_transition_to(target) {
            return Err(InvocationError::InvalidTransition {
                from: self.phase,
                to: target,
            });
        }
        self.phase = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the invocation skipped (nothing to upload)
    pub fn mark_skipped(&mut self) -> Result<(), InvocationError> {
        self.transition(UploadPhase::Skipped)
    }

    /// Record the staged file set and enter the STAGED phase
    pub fn mark_staged(&mut self, files: &[StagedFile]) -> Result<(), InvocationError> {
        self.transition(UploadPhase::Staged)?;
        self.staged_files = files.iter().map(StagedFileRecord::from).collect();
        Ok(())
    }

    /// Enter the DISPATCHING phase
    pub fn mark_dispatching(&mut self) -> Result<(), InvocationError> {
        self.transition(UploadPhase::Dispatching)
    }

    /// Mark the invocation completed
    pub fn complete(&mut self) -> Result<(), InvocationError> {
        self.transition(UploadPhase::Completed)
    }

    /// Mark the invocation failed with a failure message
    pub fn fail(&mut self, error: String) -> Result<(), InvocationError> {
        self.transition(UploadPhase::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Path of the receipt inside `dir`
    pub fn receipt_path(dir: &Path) -> PathBuf {
        dir.join(RECEIPT_FILENAME)
    }

    /// Write the receipt into `dir`, creating it if needed
    pub fn persist(&self, dir: &Path) -> Result<(), InvocationError> {
        fs::create_dir_all(dir)?;
        fs::write(Self::receipt_path(dir), self.to_json()?)?;
        Ok(())
    }
}

/// Generate a fresh invocation identifier
fn new_invocation_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}
