//! Metrics file discovery
//!
//! Normalizes a caller-supplied set of roots (files or directories) into the
//! flat list of regular files found beneath them. Directories are pruned
//! from the result. Collection is best-effort: a root that does not exist is
//! skipped without error, and a walk error under one root never aborts
//! discovery under another.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Outcome of a collection pass
#[derive(Debug, Default)]
pub struct CollectOutcome {
    /// Regular files found beneath the roots
    pub files: Vec<PathBuf>,
    /// Non-fatal errors encountered along the way
    pub errors: Vec<String>,
}

/// Collect the regular files reachable from `roots`.
///
/// A root that is itself a regular file is included directly. A directory
/// root is walked recursively without following symlinks; only entries the
/// walk classifies as regular files are kept. Missing roots are silently
/// skipped.
pub fn collect_files<P: AsRef<Path>>(roots: &[P]) -> CollectOutcome {
    let mut outcome = CollectOutcome::default();

    for root in roots {
        let root = root.as_ref();

        let meta = match fs::metadata(root) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                outcome
                    .errors
                    .push(format!("cannot stat {}: {}", root.display(), err));
                continue;
            }
        };

        if meta.is_file() {
            outcome.files.push(root.to_path_buf());
            continue;
        }

        if !meta.is_dir() {
            // Sockets, fifos and the like are not metrics files.
            continue;
        }

        for entry in WalkDir::new(root).follow_links(false) {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() {
                        outcome.files.push(entry.into_path());
                    }
                }
                Err(err) => outcome
                    .errors
                    .push(format!("walk error under {}: {}", root.display(), err)),
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_prunes_directories() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("d1/d2/d3")).unwrap();
        fs::write(root.join("d1/f1"), "").unwrap();
        fs::write(root.join("d1/d2/f1"), "").unwrap();
        fs::write(root.join("d1/d2/d3/f1"), "").unwrap();

        let mut want = vec![
            root.join("d1/f1"),
            root.join("d1/d2/f1"),
            root.join("d1/d2/d3/f1"),
        ];
        want.sort();

        let mut got = collect_files(&[root]).files;
        got.sort();

        assert_eq!(got, want);
    }

    #[test]
    fn test_collect_missing_root_skipped() {
        let dir = TempDir::new().unwrap();
        let outcome = collect_files(&[dir.path().join("does_not_exist")]);

        assert!(outcome.files.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_collect_file_root_included_directly() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("metrics.pb");
        fs::write(&file, "data").unwrap();

        let outcome = collect_files(&[&file]);
        assert_eq!(outcome.files, vec![file]);
    }

    #[test]
    fn test_collect_mixed_roots() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let file = root.join("standalone");
        fs::write(&file, "").unwrap();

        let sub = root.join("tree");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("nested"), "").unwrap();

        let missing = root.join("missing");

        let mut got = collect_files(&[file.clone(), sub.clone(), missing]).files;
        got.sort();

        let mut want = vec![file, sub.join("nested")];
        want.sort();

        assert_eq!(got, want);
    }

    #[test]
    fn test_collect_empty_directory() {
        let dir = TempDir::new().unwrap();
        let outcome = collect_files(&[dir.path()]);

        assert!(outcome.files.is_empty());
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_collect_duplicate_roots_tolerated() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "").unwrap();

        let outcome = collect_files(&[&file, &file]);
        // Duplicates in the root set produce duplicate entries; the staging
        // layer treats the list as a set of copies.
        assert_eq!(outcome.files.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_keeps_only_regular_files() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let root = dir.path();

        fs::write(root.join("real"), "").unwrap();
        symlink(root.join("real"), root.join("link")).unwrap();

        let got = collect_files(&[root]).files;
        // The walk does not follow links, so only the regular file is kept.
        assert_eq!(got, vec![root.join("real")]);
    }
}
