//! Error types for the mirroring engine.
//!
//! `EngineError` is the error returned by every engine operation. Errors are
//! scoped to one file or one job: the processor logs them and moves on to the
//! next job, so nothing here is fatal to the process.
//!
//! `RemoteError` is the error type of the [`RemoteStore`](crate::remote::RemoteStore)
//! capability and is wrapped into `EngineError::Remote` at the engine boundary.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A local filesystem operation failed (create, stat, write, rename, remove).
    #[error("Storage operation '{operation}' failed: {}", path.display())]
    Storage {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The job marker is absent, empty or unreadable. The job is skipped, never deleted.
    #[error("Job state missing in {}: {reason}", path.display())]
    MissingState { path: PathBuf, reason: String },

    /// The remote store returned an error while listing or fetching.
    #[error("Remote request failed ({context})")]
    Remote {
        context: String,
        #[source]
        source: RemoteError,
    },

    /// The local file checksum does not match the one declared by the remote.
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The remote declared metadata that can never be satisfied locally.
    #[error("Invalid remote metadata for '{file}': {reason}")]
    Metadata { file: String, reason: String },

    /// A job directory with a marker already exists at this path.
    #[error("Job already exists: {}", path.display())]
    JobExists { path: PathBuf },

    /// The configuration file could not be read or is invalid.
    #[error("Invalid configuration {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl EngineError {
    /// Build a `Storage` error for `operation` on `path`.
    pub fn storage(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Storage {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Build a `Remote` error with a short description of the failed request.
    pub fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        EngineError::Remote {
            context: context.into(),
            source,
        }
    }

    /// Whether another transfer attempt could succeed.
    ///
    /// Storage, remote and integrity failures are transient: the next attempt
    /// re-reads the local length and resumes or truncates as needed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Storage { .. } | EngineError::Remote { .. } | EngineError::Integrity { .. }
        )
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<u32> {
        match self {
            Self::Storage { source, .. } => source.raw_os_error().map(|e| e as u32),
            Self::Remote {
                source: RemoteError::Io(source),
                ..
            } => source.raw_os_error().map(|e| e as u32),
            _ => None,
        }
    }
}

/// Errors produced by a [`RemoteStore`](crate::remote::RemoteStore) implementation.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote folder not found: {0}")]
    FolderNotFound(String),

    #[error("remote file not found: {0}")]
    FileNotFound(String),

    #[error("remote I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}
