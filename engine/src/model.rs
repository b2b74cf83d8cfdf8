//! Core data model for mirroring jobs.
//!
//! This module defines the main data structures:
//! - RemoteFolder / RemoteFile: what the remote store reports
//! - PendingJob / Job: one remote folder being mirrored into one local directory
//! - JobStage, TransferOutcome, JobOutcome, TickSummary: lifecycle and results

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

/// A folder on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    /// Remote folder identifier
    pub id: String,

    /// Display name, used as the local job directory name
    pub name: String,
}

/// A file inside a remote folder, as declared by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Remote file identifier
    pub id: String,

    /// File name inside the job directory
    pub name: String,

    /// Declared size in bytes
    pub size: u64,

    /// Declared content checksum (hex)
    pub checksum: String,

    /// Last modification time reported by the remote, if any
    pub modified: Option<DateTime<Utc>>,
}

/// A job directory found in the incomplete area.
///
/// The full path is carried alongside the name so callers never have to
/// reconstruct it from a directory handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    /// Directory name (also the name under the completed area)
    pub name: String,

    /// Full path of the staging directory
    pub path: PathBuf,
}

/// A job being processed during a tick.
#[derive(Debug, Clone)]
pub struct Job {
    /// Directory name
    pub name: String,

    /// Full path of the staging directory
    pub path: PathBuf,

    /// Remote folder this job mirrors
    pub folder_id: String,

    /// Files reported by the remote for this folder
    pub files: Vec<RemoteFile>,

    /// Current lifecycle stage
    pub stage: JobStage,
}

impl Job {
    /// Total declared size of all files in the job.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Lifecycle stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    /// Discovered, files not yet all verified
    Pending,
    /// Files are being transferred during the current tick
    InTransfer,
    /// All files verified; relocation to the completed area started or pending
    AwaitingPromotion,
    /// Relocated to the completed area
    Completed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStage::Pending => write!(f, "pending"),
            JobStage::InTransfer => write!(f, "in-transfer"),
            JobStage::AwaitingPromotion => write!(f, "awaiting-promotion"),
            JobStage::Completed => write!(f, "completed"),
        }
    }
}

/// Result of a successful single-file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The local file already matched size and checksum; nothing was fetched
    AlreadyComplete,
    /// Content was fetched starting at `resumed_from` and verified
    Downloaded { resumed_from: u64, bytes_written: u64 },
}

/// How a job ended during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every file verified and the directory moved to the completed area
    Promoted { target: PathBuf },
    /// A transient failure; the job stays pending and is retried next tick
    Deferred { reason: String },
    /// The job directory is malformed (missing marker) and is left alone
    Malformed { reason: String },
}

/// Counters for one processing tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Job directories seen in the incomplete area
    pub seen: usize,
    /// Jobs promoted to the completed area
    pub promoted: usize,
    /// Jobs left pending because of a transient failure
    pub deferred: usize,
    /// Job directories skipped because their marker is missing
    pub malformed: usize,
}

impl TickSummary {
    /// Record the outcome of one job.
    pub fn record(&mut self, outcome: &JobOutcome) {
        self.seen += 1;
        match outcome {
            JobOutcome::Promoted { .. } => self.promoted += 1,
            JobOutcome::Deferred { .. } => self.deferred += 1,
            JobOutcome::Malformed { .. } => self.malformed += 1,
        }
    }
}

/// Snapshot of a pending job directory, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub path: PathBuf,
    /// Remote folder id, or `None` if the marker is missing or unreadable
    pub folder_id: Option<String>,
    pub stage: JobStage,
    /// Sum of the sizes of the content files currently on disk
    pub local_bytes: u64,
}
