//! Upload configuration
//!
//! The sidecar reads a small, read-only slice of the build orchestrator's
//! configuration: the site-configured uploader executable, the build output
//! directory, and the build timestamp identifier. Values come from the build
//! environment, with an optional site config file supplying the uploader
//! path for hosts that do not export it.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming the uploader executable
pub const UPLOADER_ENV: &str = "METRICS_UPLOADER";

/// Environment variable naming the build output directory
pub const OUT_DIR_ENV: &str = "OUT_DIR";

/// Environment variable carrying the build timestamp identifier
pub const BUILD_TIMESTAMP_ENV: &str = "BUILD_TIMESTAMP";

/// Errors for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid site config {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Ordered KEY=VALUE view of the build environment.
///
/// The uploader subprocess inherits these variables on top of the sidecar's
/// own environment, so site uploaders see the same build context the
/// orchestrator ran with.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    /// Set a variable, replacing any existing assignment
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.vars.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.vars.push((key, value));
        }
    }

    /// Set a variable, builder style
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all assignments in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of assignments
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the environment has no assignments
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Site configuration file
///
/// Lets a site configure the uploader without exporting environment
/// variables into every build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Uploader executable path (empty or absent disables uploads)
    #[serde(default)]
    pub uploader: String,
}

impl SiteConfig {
    /// Load a site config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Read-only view of the build configuration consumed by the upload
/// pipeline.
///
/// An empty uploader path means the feature is disabled and the pipeline is
/// a no-op.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    uploader: String,
    out_dir: PathBuf,
    build_timestamp: String,
    environment: Environment,
}

impl UploadConfig {
    /// Create a config with explicit values
    pub fn new(
        uploader: impl Into<String>,
        out_dir: impl Into<PathBuf>,
        build_timestamp: impl Into<String>,
    ) -> Self {
        Self {
            uploader: uploader.into(),
            out_dir: out_dir.into(),
            build_timestamp: build_timestamp.into(),
            environment: Environment::new(),
        }
    }

    /// Build a config from a build environment.
    ///
    /// Falls back to the OS temp directory when no output directory is
    /// configured, so staging still lands somewhere writable.
    pub fn from_environment(environment: Environment) -> Self {
        let uploader = environment.get(UPLOADER_ENV).unwrap_or_default().to_string();
        let out_dir = environment
            .get(OUT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);
        let build_timestamp = environment
            .get(BUILD_TIMESTAMP_ENV)
            .unwrap_or_default()
            .to_string();
        Self {
            uploader,
            out_dir,
            build_timestamp,
            environment,
        }
    }

    /// Apply a site config file.
    ///
    /// The environment takes precedence: the site uploader is only used when
    /// the environment did not name one.
    pub fn with_site_config(mut self, site: &SiteConfig) -> Self {
        if self.uploader.is_empty() && !site.uploader.is_empty() {
            self.uploader = site.uploader.clone();
        }
        self
    }

    /// Replace the environment passed to the uploader subprocess
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Uploader executable path (empty when the feature is disabled)
    pub fn uploader(&self) -> &str {
        &self.uploader
    }

    /// Whether metrics upload is enabled
    pub fn is_enabled(&self) -> bool {
        !self.uploader.is_empty()
    }

    /// Build output directory; staging directories are allocated beneath it
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Build timestamp identifier
    pub fn build_timestamp(&self) -> &str {
        &self.build_timestamp
    }

    /// Environment passed to the uploader subprocess
    pub fn environment(&self) -> &Environment {
        &self.environment
    }
}
