//! Job processing loop.
//!
//! One call to [`JobProcessor::process_once`] is one tick: every job directory
//! in the incomplete area is visited in turn, its files are transferred one
//! after another, and fully verified jobs are promoted. Failures are confined
//! to the job they happen in; the tick always continues with the next job.

use crate::error::EngineError;
use crate::job_dir::JobDirectoryStore;
use crate::model::{Job, JobOutcome, JobStage, PendingJob, RemoteFile, TickSummary};
use crate::progress::ProgressCallback;
use crate::remote::RemoteStore;
use crate::transfer::ResumableTransfer;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives pending jobs towards the completed area.
pub struct JobProcessor {
    directories: JobDirectoryStore,
    store: Arc<dyn RemoteStore>,
    transfer: ResumableTransfer,
}

impl JobProcessor {
    pub fn new(
        directories: JobDirectoryStore,
        store: Arc<dyn RemoteStore>,
        transfer: ResumableTransfer,
    ) -> Self {
        JobProcessor {
            directories,
            store,
            transfer,
        }
    }

    pub fn directories(&self) -> &JobDirectoryStore {
        &self.directories
    }

    /// Process every pending job once, sequentially.
    ///
    /// Never fails: problems are logged, counted in the summary and retried
    /// on the next tick.
    pub fn process_once(&self, progress: Option<&dyn ProgressCallback>) -> TickSummary {
        let mut summary = TickSummary::default();

        let jobs = match self.directories.list_pending_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list pending jobs");
                return summary;
            }
        };

        for entry in jobs {
            let pending = match entry {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(error = %e, "Failed to read incomplete area entry, skipping");
                    continue;
                }
            };

            let outcome = self.process_job(&pending, progress);
            summary.record(&outcome);
        }

        if summary.seen > 0 {
            info!(
                seen = summary.seen,
                promoted = summary.promoted,
                deferred = summary.deferred,
                malformed = summary.malformed,
                "Tick finished"
            );
        } else {
            debug!("Tick finished, no pending jobs");
        }

        summary
    }

    /// Take one job as far as it can go during this tick.
    pub fn process_job(
        &self,
        pending: &PendingJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> JobOutcome {
        if self.directories.job_stage(&pending.path) == JobStage::AwaitingPromotion {
            info!(job = %pending.name, "Job awaiting promotion, retrying promotion");
            return self.resume_promotion(pending, progress);
        }

        let folder_id = match self.directories.read_remote_folder_id(&pending.path) {
            Ok(folder_id) => folder_id,
            Err(e) => {
                warn!(job = %pending.name, error = %e, "Skipping job without readable marker");
                return JobOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        let files = match self.store.list_folder_files(&folder_id) {
            Ok(files) => files,
            Err(e) => {
                let e = EngineError::remote(format!("list folder {}", folder_id), e);
                warn!(
                    job = %pending.name,
                    folder_id = %folder_id,
                    error = %e,
                    "Skipping job for this tick"
                );
                return JobOutcome::Deferred {
                    reason: e.to_string(),
                };
            }
        };

        if let Some(name) = duplicate_name(&files) {
            let e = EngineError::Metadata {
                file: name.to_string(),
                reason: format!("folder {} lists more than one file with this name", folder_id),
            };
            warn!(
                job = %pending.name,
                folder_id = %folder_id,
                error = %e,
                "Skipping job for this tick"
            );
            return JobOutcome::Deferred {
                reason: e.to_string(),
            };
        }

        let mut job = Job {
            name: pending.name.clone(),
            path: pending.path.clone(),
            folder_id,
            files,
            stage: JobStage::InTransfer,
        };

        info!(
            job = %job.name,
            folder_id = %job.folder_id,
            files = job.files.len(),
            bytes = job.total_bytes(),
            "Processing job"
        );
        if let Some(callback) = progress {
            callback.on_job_started(&job);
        }

        let outcome = self.run_job(&mut job, progress);

        if let Some(callback) = progress {
            callback.on_job_completed(&job, &outcome);
        }
        outcome
    }

    fn run_job(&self, job: &mut Job, progress: Option<&dyn ProgressCallback>) -> JobOutcome {
        for file_index in 0..job.files.len() {
            let file = &job.files[file_index];

            if let Some(callback) = progress {
                callback.on_file_started(job, file_index, file);
            }

            let result = self.transfer.transfer(file, &job.path, progress);

            if let Some(callback) = progress {
                callback.on_file_completed(job, file_index, file, &result);
            }

            if let Err(e) = result {
                error!(
                    job = %job.name,
                    file = %file.name,
                    error = %e,
                    "Transfer failed, job stays pending until next tick"
                );
                let reason = format!("{}: {}", file.name, e);
                job.stage = JobStage::Pending;
                return JobOutcome::Deferred { reason };
            }
        }

        job.stage = JobStage::AwaitingPromotion;
        let outcome = self.promote(&PendingJob {
            name: job.name.clone(),
            path: job.path.clone(),
        });
        job.stage = match outcome {
            JobOutcome::Promoted { .. } => JobStage::Completed,
            _ => JobStage::AwaitingPromotion,
        };
        outcome
    }

    /// Finish a promotion that an earlier tick started. No files are listed or transferred.
    fn resume_promotion(
        &self,
        pending: &PendingJob,
        progress: Option<&dyn ProgressCallback>,
    ) -> JobOutcome {
        // The marker may already be gone if the earlier attempt got past deleting it.
        let folder_id = self
            .directories
            .read_remote_folder_id(&pending.path)
            .unwrap_or_default();
        let mut job = Job {
            name: pending.name.clone(),
            path: pending.path.clone(),
            folder_id,
            files: Vec::new(),
            stage: JobStage::AwaitingPromotion,
        };

        let outcome = self.promote(pending);
        if let JobOutcome::Promoted { .. } = outcome {
            job.stage = JobStage::Completed;
        }

        if let Some(callback) = progress {
            callback.on_job_completed(&job, &outcome);
        }
        outcome
    }

    fn promote(&self, pending: &PendingJob) -> JobOutcome {
        match self.directories.promote_job(&pending.path) {
            Ok(target) => JobOutcome::Promoted { target },
            Err(e) => {
                error!(job = %pending.name, error = %e, "Promotion failed, will retry next tick");
                JobOutcome::Deferred {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// First file name that appears more than once in a listing.
fn duplicate_name(files: &[RemoteFile]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(files.len());
    files
        .iter()
        .map(|f| f.name.as_str())
        .find(|name| !seen.insert(*name))
}
