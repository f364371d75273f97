//! Error types for the depot.
//!
//! Every public operation returns [`Result`]. Variants are grouped into the
//! five classes reported by [`DepotError::kind`] so callers can tell "pick a
//! different path" apart from "check permissions".

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, DepotError>;

/// Broad error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: invalid names, wrong component types.
    Validation,
    /// File-system failures, including symlink permission failures.
    Io,
    /// Unrecognised or malformed data: archives, metadata blocks, records.
    Format,
    /// An external process failed or printed something unexpected.
    ExternalTool,
    /// The mutation would break a repository or aggregate invariant.
    Consistency,
}

/// Depot errors.
#[derive(Debug, Error)]
pub enum DepotError {
    /// Name cannot be used as a file or directory name.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Component of the wrong type passed to an aggregate or sub-repository.
    #[error("{target} does not accept {found}")]
    WrongComponentType {
        /// What rejected the component.
        target: String,
        /// Kind that was offered.
        found: String,
    },

    /// Generic validation failure.
    #[error("{0}")]
    Validation(String),

    /// A capability flag forbids the operation.
    #[error("{operation} is not allowed for {component}")]
    NotAllowed {
        /// Operation that was attempted.
        operation: String,
        /// Component display name.
        component: String,
    },

    /// I/O failure at a path.
    #[error("{action} {path}: {source}")]
    Io {
        /// What was being done ("Error copying", "Error removing", ...).
        action: String,
        /// Offending path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Target path already exists.
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    /// Path that should exist does not.
    #[error("Not found: {0}")]
    PathNotFound(PathBuf),

    /// Symlink creation refused by the OS.
    #[error(
        "Cannot create symlink {link} -> {target}: {source}. On Windows enable Developer Mode \
         or run as administrator; elsewhere check that the filesystem supports symlinks"
    )]
    SymlinkDenied {
        /// Link path.
        link: PathBuf,
        /// Link target.
        target: PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// No addon metadata found at a path.
    #[error("Addon info not found in {0}")]
    AddonInfoNotFound(PathBuf),

    /// Archive has no usable layout.
    #[error("Invalid archive {path}: {reason}")]
    InvalidArchive {
        /// Archive path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// Generic format error.
    #[error("Format error: {0}")]
    Format(String),

    /// Zip library error.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON encoding or decoding error.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// External process exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        /// Executable that was run.
        program: String,
        /// Exit status description.
        status: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// External process output did not contain the expected pattern.
    #[error("Unexpected output from {program}, expected {expected}: {output}")]
    UnexpectedOutput {
        /// Executable that was run.
        program: String,
        /// Pattern that was looked for.
        expected: String,
        /// Captured output.
        output: String,
    },

    /// External process could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Executable that was run.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// External process did not finish in time.
    #[error("{program} timed out after {seconds}s")]
    Timeout {
        /// Executable that was run.
        program: String,
        /// Timeout that elapsed.
        seconds: u64,
    },

    /// Logically equal entity already present.
    #[error("{0} already exists in {1}")]
    Duplicate(String, String),

    /// Entity missing from a pool or aggregate.
    #[error("{0} not found in {1}")]
    NotFound(String, String),

    /// Venv does not originate from the bound program.
    #[error("Venv {venv} was derived from {venv_program}, not {program}")]
    LineageMismatch {
        /// Venv name.
        venv: String,
        /// Blender executable recorded by the venv.
        venv_program: PathBuf,
        /// Blender executable of the bound program.
        program: PathBuf,
    },

    /// Generic consistency failure.
    #[error("{0}")]
    Consistency(String),
}

impl DepotError {
    /// Returns the error class.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName(_)
            | Self::WrongComponentType { .. }
            | Self::Validation(_)
            | Self::NotAllowed { .. } => ErrorKind::Validation,
            Self::Io { .. }
            | Self::AlreadyExists(_)
            | Self::PathNotFound(_)
            | Self::SymlinkDenied { .. } => ErrorKind::Io,
            Self::AddonInfoNotFound(_)
            | Self::InvalidArchive { .. }
            | Self::Format(_)
            | Self::Zip(_)
            | Self::Json(_) => ErrorKind::Format,
            Self::ToolFailed { .. }
            | Self::UnexpectedOutput { .. }
            | Self::Spawn { .. }
            | Self::Timeout { .. } => ErrorKind::ExternalTool,
            Self::Duplicate(..)
            | Self::NotFound(..)
            | Self::LineageMismatch { .. }
            | Self::Consistency(_) => ErrorKind::Consistency,
        }
    }

    /// Builds an [`DepotError::Io`] for `path`.
    pub fn io(action: impl Into<String>, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            action: action.into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns true for the "already exists" class of failures.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::Duplicate(..))
    }
}

/// Attaches path context to `io::Result`.
pub(crate) trait IoContext<T> {
    fn at(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, action: &str, path: &Path) -> Result<T> {
        self.map_err(|e| DepotError::io(action, path, e))
    }
}
