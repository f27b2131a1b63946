// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for mmpack-build
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata or side-file serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A version string that cannot be parsed
    #[error("Invalid version string: {0:?}")]
    InvalidVersion(String),

    /// An external command (analyzer, system package query) failed
    #[error("Command {cmd:?} failed: {reason}")]
    Command { cmd: String, reason: String },

    /// A claimed unit has no recognizable entry point
    #[error("No entry point found for package {unit} in {sitedir}")]
    MalformedUnit { unit: String, sitedir: String },

    /// A referenced unit cannot be satisfied by self, siblings, prefix or host
    #[error("Could not find package providing {unit} imported by {pkg}")]
    UnresolvedImport { pkg: String, unit: String },

    /// Staging normalization would overwrite a file with different content
    #[error("Conflicting file during install tree normalization: {path}")]
    StagingConflict { path: PathBuf },

    /// Output artifact path already exists
    #[error("Archive already exists: {0}")]
    ArchiveExists(PathBuf),

    /// Workspace directory resolution or maintenance failure
    #[error("Workspace error: {0}")]
    Workspace(String),
}

/// Result type alias using mmpack-build's Error type
pub type Result<T> = std::result::Result<T, Error>;
