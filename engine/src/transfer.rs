//! Resumable single-file transfer.
//!
//! A transfer appends remote content to the local file starting at the
//! local file's current length, so the length on disk is the only resume
//! cursor. Each attempt opens the local file, works on it and closes it
//! again; the retry loop simply runs another attempt, which picks up
//! whatever bytes the previous one left behind.

use crate::checksums::{checksum_bytes, checksums_match, compute_file_checksum, ChecksumAlgorithm};
use crate::error::{EngineError, RemoteError};
use crate::job_dir::validate_entry_name;
use crate::model::{RemoteFile, TransferOutcome};
use crate::progress::ProgressCallback;
use crate::remote::RemoteStore;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Size of the copy buffer between the remote stream and the local file.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per transfer, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for any delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping.
    pub fn without_delay(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Downloads remote files into a local directory, resuming and verifying.
pub struct ResumableTransfer {
    store: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    algorithm: ChecksumAlgorithm,
}

impl ResumableTransfer {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        policy: RetryPolicy,
        algorithm: ChecksumAlgorithm,
    ) -> Self {
        ResumableTransfer {
            store,
            policy,
            algorithm,
        }
    }

    /// Bring `target_dir/<file.name>` to the declared size and checksum.
    ///
    /// Retries transient failures up to the policy's attempt count; every
    /// attempt resumes from the bytes already on disk. The last error is
    /// returned once attempts are exhausted.
    pub fn transfer(
        &self,
        file: &RemoteFile,
        target_dir: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<TransferOutcome, EngineError> {
        validate_entry_name(&file.name).map_err(|reason| EngineError::Metadata {
            file: file.name.clone(),
            reason,
        })?;
        let path = target_dir.join(&file.name);

        let mut attempt = 1;
        loop {
            match self.attempt(file, &path, progress) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        file = %file.name,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transfer attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt. The local file handle lives exactly as long as this call.
    fn attempt(
        &self,
        remote: &RemoteFile,
        path: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<TransferOutcome, EngineError> {
        if remote.size == 0 {
            return self.complete_empty(remote, path);
        }

        let mut local = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::storage("open local file", path, e))?;
        let mut local_len = local
            .metadata()
            .map_err(|e| EngineError::storage("stat local file", path, e))?
            .len();

        if local_len == remote.size {
            let actual = compute_file_checksum(path, self.algorithm)?;
            if checksums_match(&remote.checksum, &actual) {
                debug!(file = %remote.name, "Local file already complete");
                self.apply_modified_time(remote, path);
                return Ok(TransferOutcome::AlreadyComplete);
            }
            warn!(
                file = %remote.name,
                expected = %remote.checksum,
                actual = %actual,
                "Local file has full size but wrong checksum, restarting download"
            );
            truncate(&local, path)?;
            local_len = 0;
        } else if local_len > remote.size {
            warn!(
                file = %remote.name,
                local_len,
                remote_size = remote.size,
                "Local file larger than remote, probably corrupt; truncating"
            );
            truncate(&local, path)?;
            local_len = 0;
        }

        let resumed_from = local_len;
        if resumed_from > 0 {
            info!(
                file = %remote.name,
                offset = resumed_from,
                size = remote.size,
                "Resuming download"
            );
        } else {
            info!(file = %remote.name, size = remote.size, "Starting download");
        }

        let mut stream = self.store.fetch_content(&remote.id, resumed_from).map_err(|e| {
            EngineError::remote(format!("fetch {} from offset {}", remote.id, resumed_from), e)
        })?;
        let bytes_written =
            append_stream(&mut stream, &mut local, path, remote, resumed_from, progress)?;
        local
            .sync_all()
            .map_err(|e| EngineError::storage("sync local file", path, e))?;
        drop(local);

        let total = resumed_from + bytes_written;
        if total < remote.size {
            return Err(EngineError::remote(
                format!("fetch {}", remote.id),
                RemoteError::Other(format!("stream ended at byte {} of {}", total, remote.size)),
            ));
        }

        let actual = compute_file_checksum(path, self.algorithm)?;
        if !checksums_match(&remote.checksum, &actual) {
            return Err(EngineError::Integrity {
                path: path.to_path_buf(),
                expected: remote.checksum.clone(),
                actual,
            });
        }

        self.apply_modified_time(remote, path);
        info!(file = %remote.name, bytes_written, resumed_from, "Download verified");
        Ok(TransferOutcome::Downloaded {
            resumed_from,
            bytes_written,
        })
    }

    /// Zero-byte files need no content fetch: an existing empty local file is complete.
    fn complete_empty(
        &self,
        remote: &RemoteFile,
        path: &Path,
    ) -> Result<TransferOutcome, EngineError> {
        let empty_checksum = checksum_bytes(self.algorithm, b"");
        if !remote.checksum.trim().is_empty()
            && !checksums_match(&remote.checksum, &empty_checksum)
        {
            return Err(EngineError::Metadata {
                file: remote.name.clone(),
                reason: format!(
                    "declared size is 0 but checksum {} is not the checksum of empty content",
                    remote.checksum
                ),
            });
        }

        let local = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::storage("open local file", path, e))?;
        let local_len = local
            .metadata()
            .map_err(|e| EngineError::storage("stat local file", path, e))?
            .len();
        if local_len > 0 {
            warn!(file = %remote.name, local_len, "Remote file is empty, truncating local file");
            truncate(&local, path)?;
        }

        self.apply_modified_time(remote, path);
        Ok(TransferOutcome::AlreadyComplete)
    }

    fn apply_modified_time(&self, remote: &RemoteFile, path: &Path) {
        if let Some(modified) = remote.modified {
            let mtime = filetime::FileTime::from_system_time(SystemTime::from(modified));
            if let Err(e) = filetime::set_file_mtime(path, mtime) {
                warn!(file = %remote.name, error = %e, "Failed to set modification time");
            }
        }
    }
}

fn truncate(local: &File, path: &Path) -> Result<(), EngineError> {
    local
        .set_len(0)
        .map_err(|e| EngineError::storage("truncate local file", path, e))
}

/// Append the remote stream to the local file and return the bytes written.
///
/// Read errors are remote failures; write errors are storage failures.
/// Bytes written before an error stay on disk for the next attempt.
fn append_stream(
    stream: &mut Box<dyn Read + Send>,
    local: &mut File,
    path: &Path,
    remote: &RemoteFile,
    offset: u64,
    progress: Option<&dyn ProgressCallback>,
) -> Result<u64, EngineError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;

    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::remote(
                    format!("read {} at byte {}", remote.id, offset + written),
                    RemoteError::Io(e),
                ))
            }
        };

        local
            .write_all(&buffer[..n])
            .map_err(|e| EngineError::storage("append to local file", path, e))?;
        written += n as u64;

        if let Some(callback) = progress {
            callback.on_file_progress(remote, offset + written);
        }
    }

    Ok(written)
}
