//! # Mirror Engine - Resumable Folder Mirroring Library
//!
//! A headless engine that mirrors folders from a remote file store onto
//! local disk. Designed as the foundation for the `mirror` CLI and any other
//! front end that creates jobs.
//!
//! ## Overview
//!
//! Each job is a directory under `incomplete/` carrying a marker file with
//! the remote folder id. On every tick the engine:
//! - lists the pending job directories
//! - asks the remote store for the folder's files
//! - downloads each file, resuming from the bytes already on disk and
//!   verifying the checksum
//! - moves fully verified jobs to `completed/`
//!
//! Failures stay inside the job they happen in and are retried on the next tick.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirror_engine::{FsRemoteStore, JobManager, MirrorConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MirrorConfig::default();
//! let store = Arc::new(FsRemoteStore::new(&config.remote.root, config.transfer.checksum));
//! let manager = JobManager::new(&config, store)?;
//!
//! // Queue a remote folder for mirroring
//! manager.create_job("Photos")?;
//!
//! // Run one tick
//! let summary = manager.process_once(None);
//! println!("Promoted {} jobs", summary.promoted);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (RemoteFile, Job, JobStage, outcomes)
//! - **error**: Error types and handling
//! - **checksums**: Checksum computation and comparison
//! - **config**: TOML configuration and directory layout
//! - **remote**: Remote store trait and the filesystem-backed store
//! - **job_dir**: Job directory and marker lifecycle
//! - **transfer**: Resumable, verified single-file download with retry
//! - **processor**: One processing tick over all pending jobs
//! - **manager**: Tick scheduling and job creation
//! - **progress**: Progress callback trait

pub mod model;
pub mod error;
pub mod checksums;
pub mod config;
pub mod remote;
pub mod job_dir;
pub mod transfer;
pub mod processor;
pub mod manager;
pub mod progress;

#[cfg(test)]
mod testutil;

// Re-export main types
pub use model::{
    Job, JobOutcome, JobStage, JobStatus, PendingJob, RemoteFile, RemoteFolder, TickSummary,
    TransferOutcome,
};
pub use error::{EngineError, RemoteError};
pub use checksums::{ChecksumAlgorithm, compute_file_checksum};
pub use config::{Layout, LoggingConfig, MirrorConfig};
pub use remote::{FsRemoteStore, RemoteStore};
pub use job_dir::JobDirectoryStore;
pub use transfer::{ResumableTransfer, RetryPolicy};
pub use processor::JobProcessor;
pub use manager::JobManager;
pub use progress::ProgressCallback;
