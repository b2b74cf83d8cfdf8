//! Console progress display.

use mirror_engine::{EngineError, Job, JobOutcome, ProgressCallback, RemoteFile, TransferOutcome};
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum time between two progress lines.
const PROGRESS_THROTTLE: Duration = Duration::from_millis(200);

/// CLI implementation of ProgressCallback, writing to stderr.
pub struct CliProgress {
    verbose: bool,
    job_started: Mutex<Instant>,
    last_progress_update: Mutex<Instant>,
}

impl CliProgress {
    pub fn new(verbose: bool) -> Self {
        let now = Instant::now();
        CliProgress {
            verbose,
            job_started: Mutex::new(now),
            last_progress_update: Mutex::new(now),
        }
    }

    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    pub fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    pub fn failure_line(file_index: usize, file_name: &str, error: &EngineError) -> String {
        match error.raw_os_error() {
            Some(code) => format!(
                "[{:3}] Failed: {}: {} (os error {})",
                file_index, file_name, error, code
            ),
            None => format!("[{:3}] Failed: {}: {}", file_index, file_name, error),
        }
    }

    pub fn progress_bar(done: u64, total: u64) -> String {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) as f64 / total as f64 * 100.0) as u32
        };
        let filled = (percent / 5) as usize;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(20 - filled), percent)
    }
}

impl ProgressCallback for CliProgress {
    fn on_job_started(&self, job: &Job) {
        if let Ok(mut started) = self.job_started.lock() {
            *started = Instant::now();
        }
        eprintln!(
            "Mirroring '{}' (folder {}): {} files, {}",
            job.name,
            job.folder_id,
            job.files.len(),
            Self::format_bytes(job.total_bytes())
        );
    }

    fn on_file_started(&self, _job: &Job, file_index: usize, file: &RemoteFile) {
        if self.verbose {
            eprintln!("[{:3}] Starting: {}", file_index, file.name);
        }
    }

    fn on_file_progress(&self, file: &RemoteFile, bytes_on_disk: u64) {
        let Ok(mut last) = self.last_progress_update.lock() else {
            return;
        };
        if last.elapsed() < PROGRESS_THROTTLE && bytes_on_disk < file.size {
            return;
        }
        *last = Instant::now();

        eprint!(
            "\r{} {} {}/{}",
            file.name,
            Self::progress_bar(bytes_on_disk, file.size),
            Self::format_bytes(bytes_on_disk),
            Self::format_bytes(file.size)
        );
        let _ = std::io::stderr().flush();
    }

    fn on_file_completed(
        &self,
        _job: &Job,
        file_index: usize,
        file: &RemoteFile,
        result: &Result<TransferOutcome, EngineError>,
    ) {
        match result {
            Err(e) => {
                eprintln!();
                eprintln!("{}", Self::failure_line(file_index, &file.name, e));
            }
            Ok(outcome) if self.verbose => {
                let status = match outcome {
                    TransferOutcome::AlreadyComplete => "Already complete".to_string(),
                    TransferOutcome::Downloaded { resumed_from: 0, .. } => "Downloaded".to_string(),
                    TransferOutcome::Downloaded { resumed_from, .. } => {
                        format!("Resumed at {}", Self::format_bytes(*resumed_from))
                    }
                };
                eprintln!();
                eprintln!("[{:3}] {}: {}", file_index, status, file.name);
            }
            Ok(_) => {}
        }
    }

    fn on_job_completed(&self, job: &Job, outcome: &JobOutcome) {
        let elapsed = self
            .job_started
            .lock()
            .map(|started| started.elapsed())
            .unwrap_or_default();

        eprintln!();
        match outcome {
            JobOutcome::Promoted { target } => eprintln!(
                "Job '{}' complete in {} -> {}",
                job.name,
                Self::format_duration(elapsed),
                target.display()
            ),
            JobOutcome::Deferred { reason } => {
                eprintln!("Job '{}' left pending until next tick: {}", job.name, reason)
            }
            JobOutcome::Malformed { reason } => eprintln!("Job '{}' skipped: {}", job.name, reason),
        }
    }
}
