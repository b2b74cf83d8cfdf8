//! Job scheduling and creation.
//!
//! The [`JobManager`] owns the processor and runs it on a fixed tick. It also
//! exposes job creation to whatever front end accepts new jobs; creation only
//! ever adds new directories, so it can run at any time relative to a tick.

use crate::config::{Layout, MirrorConfig};
use crate::error::EngineError;
use crate::job_dir::JobDirectoryStore;
use crate::model::{JobStatus, TickSummary};
use crate::processor::JobProcessor;
use crate::progress::ProgressCallback;
use crate::remote::RemoteStore;
use crate::transfer::ResumableTransfer;
use crossbeam_channel::{select, tick, Receiver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Owns periodic processing and job creation.
pub struct JobManager {
    store: Arc<dyn RemoteStore>,
    directories: JobDirectoryStore,
    processor: JobProcessor,
    tick_interval: Duration,
}

impl JobManager {
    /// Build a manager from configuration, creating the staging and completed roots.
    pub fn new(config: &MirrorConfig, store: Arc<dyn RemoteStore>) -> Result<Self, EngineError> {
        let layout = config.layout();
        layout.prepare()?;
        info!(
            downloads = %config.downloads_dir.display(),
            checksum = %config.transfer.checksum,
            max_attempts = config.transfer.max_attempts,
            "Prepared download areas"
        );

        let transfer = ResumableTransfer::new(
            store.clone(),
            config.retry_policy(),
            config.transfer.checksum,
        );
        Ok(Self::with_parts(&layout, store, transfer, config.tick_interval()))
    }

    /// Build a manager from explicit parts.
    pub fn with_parts(
        layout: &Layout,
        store: Arc<dyn RemoteStore>,
        transfer: ResumableTransfer,
        tick_interval: Duration,
    ) -> Self {
        let directories = JobDirectoryStore::new(layout);
        let processor = JobProcessor::new(directories.clone(), store.clone(), transfer);
        JobManager {
            store,
            directories,
            processor,
            tick_interval,
        }
    }

    pub fn directories(&self) -> &JobDirectoryStore {
        &self.directories
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Create a job for a remote folder. The job directory is named after the folder.
    pub fn create_job(&self, folder_id: &str) -> Result<PathBuf, EngineError> {
        let folder = self
            .store
            .folder(folder_id)
            .map_err(|e| EngineError::remote(format!("look up folder {}", folder_id), e))?;
        self.directories.create_job_directory(&folder.id, &folder.name)
    }

    /// Run a single tick.
    pub fn process_once(&self, progress: Option<&dyn ProgressCallback>) -> TickSummary {
        self.processor.process_once(progress)
    }

    /// Run ticks until `shutdown` receives a message or is disconnected.
    ///
    /// The first tick runs immediately. Ticks run on the calling thread, so a
    /// slow tick delays the next one instead of overlapping it.
    pub fn run(&self, shutdown: &Receiver<()>, progress: Option<&dyn ProgressCallback>) -> u64 {
        info!(interval_secs = self.tick_interval.as_secs_f64(), "Job manager started");

        let ticker = tick(self.tick_interval);
        let mut ticks = 0u64;

        self.process_once(progress);
        ticks += 1;

        loop {
            select! {
                recv(ticker) -> _ => {
                    self.process_once(progress);
                    ticks += 1;
                }
                recv(shutdown) -> message => {
                    if message.is_err() {
                        warn!("Shutdown channel disconnected");
                    }
                    break;
                }
            }
        }

        info!(ticks, "Job manager stopped");
        ticks
    }

    /// Status of every job directory in the incomplete area.
    pub fn pending_jobs(&self) -> Result<Vec<JobStatus>, EngineError> {
        let mut statuses = Vec::new();
        for entry in self.directories.list_pending_jobs()? {
            statuses.push(self.directories.inspect(&entry?)?);
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(statuses)
    }
}
