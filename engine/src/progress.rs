//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which decouples the
//! mirroring engine from whatever displays progress (CLI, logs, tests).

use crate::error::EngineError;
use crate::model::{Job, JobOutcome, RemoteFile, TransferOutcome};

/// Trait for receiving progress updates while jobs are processed.
///
/// All methods are called synchronously on the processing thread.
pub trait ProgressCallback: Send + Sync {
    /// Called once the job's remote file list is known, before any transfer.
    fn on_job_started(&self, job: &Job);

    /// Called when a file is about to be transferred.
    fn on_file_started(&self, job: &Job, file_index: usize, file: &RemoteFile);

    /// Called as bytes are appended to the local file.
    ///
    /// `bytes_on_disk` is the local length, including bytes from earlier attempts.
    fn on_file_progress(&self, file: &RemoteFile, bytes_on_disk: u64);

    /// Called when a file transfer ends, successfully or not.
    fn on_file_completed(
        &self,
        job: &Job,
        file_index: usize,
        file: &RemoteFile,
        result: &Result<TransferOutcome, EngineError>,
    );

    /// Called when the job is promoted or left pending for this tick.
    fn on_job_completed(&self, job: &Job, outcome: &JobOutcome);
}
