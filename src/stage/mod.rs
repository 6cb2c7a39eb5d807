//! Staging of metrics files for upload
//!
//! Copies candidate metrics files into an ephemeral, permission-restricted
//! staging directory so the uploader works on copies whose lifetime this
//! crate controls. The temp-dir allocator is injectable; tests substitute it
//! to control both where staging lands and how allocation fails. A staging
//! area removes its directory when dropped, and a copy failure removes the
//! partially built directory before the error is surfaced.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Name prefix for staging directories
pub const STAGING_PREFIX: &str = "metrics_upload";

/// Allocator for staging directories: `(parent, prefix)` to a fresh,
/// uniquely named directory.
pub type TempDirProvider = Arc<dyn Fn(&Path, &str) -> io::Result<PathBuf> + Send + Sync>;

/// Default allocator.
///
/// Creates the parent if needed and allocates a uniquely named directory
/// beneath it, readable only by the owning user on Unix.
pub fn default_temp_dir_provider() -> TempDirProvider {
    Arc::new(|parent, prefix| {
        fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
        Ok(dir.into_path())
    })
}

/// Errors for staging operations
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to create staging directory under {parent}: {source}")]
    CreateDir {
        parent: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy {src} to {dst}: {source}")]
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A file copied into the staging area
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Path of the staged copy
    pub path: PathBuf,
    /// Original source path
    pub source: PathBuf,
    /// Size of the copy in bytes
    pub size: u64,
    /// SHA-256 of the copied bytes
    pub sha256: String,
}

/// Ephemeral directory owning the staged copies for one upload invocation.
///
/// The directory is removed when `remove` is called or when the area is
/// dropped, whichever comes first, so no exit path leaves it behind.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    files: Vec<StagedFile>,
    removed: bool,
}

impl StagingArea {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: Vec::new(),
            removed: false,
        }
    }

    /// Path of the staging directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files staged so far
    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    /// Paths of the staged copies, in staging order
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Remove the staging directory and everything in it.
    ///
    /// Removal failures are logged, not returned; there is nothing a caller
    /// can do about a directory that refuses to go away.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        if let Err(err) = fs::remove_dir_all(&self.dir) {
            if err.kind() != io::ErrorKind::NotFound {
                eprintln!(
                    "[metrics-upload] failed to remove staging directory {}: {}",
                    self.dir.display(),
                    err
                );
            }
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Copies metrics files into a fresh staging area
pub struct Stager {
    parent: PathBuf,
    provider: TempDirProvider,
}

impl Stager {
    /// Create a stager allocating staging directories under `parent`
    pub fn new(parent: PathBuf) -> Self {
        Self {
            parent,
            provider: default_temp_dir_provider(),
        }
    }

    /// Replace the temp-dir allocator
    pub fn with_provider(mut self, provider: TempDirProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Copy `files` into a newly allocated staging directory.
    ///
    /// Each file is copied in full under its base name; the source is left
    /// untouched and the copy survives later deletion of the source. A base
    /// name that was already staged is disambiguated by prefixing the file's
    /// zero-based input index, so no copy silently overwrites another. If
    /// any copy fails the staging directory is removed before the error is
    /// returned.
    pub fn stage(&self, files: &[PathBuf]) -> Result<StagingArea, StageError> {
        let dir = (self.provider)(&self.parent, STAGING_PREFIX).map_err(|source| {
            StageError::CreateDir {
                parent: self.parent.clone(),
                source,
            }
        })?;

        let mut area = StagingArea::new(dir);
        let mut used_names: HashSet<OsString> = HashSet::new();

        for (index, src) in files.iter().enumerate() {
            let base = match src.file_name() {
                Some(base) => base.to_os_string(),
                None => OsString::from(format!("metrics_{}", index)),
            };
            let name = if used_names.contains(&base) {
                let mut prefixed = OsString::from(format!("{}_", index));
                prefixed.push(&base);
                prefixed
            } else {
                base
            };
            used_names.insert(name.clone());

            let dst = area.dir.join(&name);
            let (size, sha256) = match copy_file(src, &dst) {
                Ok(copied) => copied,
                Err(source) => {
                    area.remove();
                    return Err(StageError::Copy {
                        src: src.clone(),
                        dst,
                        source,
                    });
                }
            };

            area.files.push(StagedFile {
                path: dst,
                source: src.clone(),
                size,
                sha256,
            });
        }

        Ok(area)
    }
}

/// Copy `src` to `dst` in full, returning the copy's size and SHA-256.
fn copy_file(src: &Path, dst: &Path) -> io::Result<(u64, String)> {
    let contents = fs::read(src)?;
    let sha256 = {
        let mut hasher = Sha256::new();
        hasher.update(&contents);
        hex::encode(hasher.finalize())
    };
    fs::write(dst, &contents)?;
    Ok((contents.len() as u64, sha256))
}
