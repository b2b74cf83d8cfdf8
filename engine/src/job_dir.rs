//! Job directory lifecycle on local disk.
//!
//! Every job lives in its own directory under the incomplete area. The
//! directory holds a marker file with the remote folder id for as long as the
//! job is pending, plus whatever content has been downloaded so far. Once all
//! files are verified the content is renamed into a directory of the same name
//! under the completed area.
//!
//! Directory and marker presence are the only coordination between job
//! creation and processing; there are no locks.

use crate::config::Layout;
use crate::error::EngineError;
use crate::model::{JobStage, JobStatus, PendingJob};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Marker file binding a job directory to its remote folder.
pub const MARKER_FILE_NAME: &str = ".remote-folder-id";

/// Temporary name the marker is written under before being renamed into place.
pub const MARKER_TEMP_FILE_NAME: &str = ".remote-folder-id.tmp";

/// Sentinel recording that promotion has started for a job.
pub const PROMOTION_FILE_NAME: &str = ".awaiting-promotion";

/// Whether `name` is reserved for job bookkeeping and never treated as content.
pub fn is_reserved_name(name: &str) -> bool {
    matches!(name, MARKER_FILE_NAME | MARKER_TEMP_FILE_NAME | PROMOTION_FILE_NAME)
}

/// Check that `name` is a single, non-reserved path component.
pub fn validate_entry_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(format!("'{}' is not a valid name", name));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(format!("'{}' contains a path separator", name));
    }
    if is_reserved_name(name) {
        return Err(format!("'{}' is a reserved name", name));
    }
    Ok(())
}

/// Filesystem operations over the incomplete and completed areas.
#[derive(Debug, Clone)]
pub struct JobDirectoryStore {
    incomplete_root: PathBuf,
    completed_root: PathBuf,
}

impl JobDirectoryStore {
    pub fn new(layout: &Layout) -> Self {
        JobDirectoryStore {
            incomplete_root: layout.incomplete.clone(),
            completed_root: layout.completed.clone(),
        }
    }

    pub fn incomplete_root(&self) -> &Path {
        &self.incomplete_root
    }

    pub fn completed_root(&self) -> &Path {
        &self.completed_root
    }

    /// Create a job directory for `remote_folder_id` and write its marker.
    ///
    /// The marker is the directory's first content. Fails with `JobExists` if
    /// a job with this name is already pending.
    pub fn create_job_directory(
        &self,
        remote_folder_id: &str,
        name: &str,
    ) -> Result<PathBuf, EngineError> {
        validate_entry_name(name).map_err(|reason| EngineError::Metadata {
            file: name.to_string(),
            reason,
        })?;
        if remote_folder_id.trim().is_empty() {
            return Err(EngineError::Metadata {
                file: name.to_string(),
                reason: "remote folder id is empty".to_string(),
            });
        }

        let path = self.incomplete_root.join(name);
        if path.join(MARKER_FILE_NAME).exists() {
            return Err(EngineError::JobExists { path });
        }

        fs::create_dir_all(&path)
            .map_err(|e| EngineError::storage("create job directory", &path, e))?;
        self.write_remote_folder_id(&path, remote_folder_id)?;

        info!(job = %name, folder_id = %remote_folder_id, "Created job directory");
        Ok(path)
    }

    /// Write the marker atomically: a reader sees either no marker or the full id.
    fn write_remote_folder_id(
        &self,
        job_dir: &Path,
        remote_folder_id: &str,
    ) -> Result<(), EngineError> {
        let temp_path = job_dir.join(MARKER_TEMP_FILE_NAME);
        let marker_path = job_dir.join(MARKER_FILE_NAME);

        let mut file = fs::File::create(&temp_path)
            .map_err(|e| EngineError::storage("create marker", &temp_path, e))?;
        file.write_all(remote_folder_id.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| EngineError::storage("write marker", &temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &marker_path)
            .map_err(|e| EngineError::storage("rename marker", &marker_path, e))
    }

    /// Enumerate first-level directories of the incomplete area.
    ///
    /// The listing is lazy; calling this again reflects the current disk state.
    pub fn list_pending_jobs(&self) -> Result<PendingJobs, EngineError> {
        let entries = fs::read_dir(&self.incomplete_root)
            .map_err(|e| EngineError::storage("list incomplete area", &self.incomplete_root, e))?;
        Ok(PendingJobs {
            root: self.incomplete_root.clone(),
            entries,
        })
    }

    /// Read the remote folder id from a job's marker.
    pub fn read_remote_folder_id(&self, job_dir: &Path) -> Result<String, EngineError> {
        let marker_path = job_dir.join(MARKER_FILE_NAME);
        let content = fs::read_to_string(&marker_path).map_err(|e| EngineError::MissingState {
            path: job_dir.to_path_buf(),
            reason: if e.kind() == io::ErrorKind::NotFound {
                "marker file absent".to_string()
            } else {
                format!("marker file unreadable: {}", e)
            },
        })?;

        let folder_id = content.trim();
        if folder_id.is_empty() {
            return Err(EngineError::MissingState {
                path: job_dir.to_path_buf(),
                reason: "marker file is empty".to_string(),
            });
        }
        Ok(folder_id.to_string())
    }

    /// Remove a job's marker. Removing an absent marker succeeds.
    pub fn delete_remote_folder_id(&self, job_dir: &Path) -> Result<(), EngineError> {
        let marker_path = job_dir.join(MARKER_FILE_NAME);
        match fs::remove_file(&marker_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::storage("delete marker", marker_path, e)),
        }
    }

    /// Stage of a job directory as recorded on disk.
    pub fn job_stage(&self, job_dir: &Path) -> JobStage {
        if job_dir.join(PROMOTION_FILE_NAME).exists() {
            JobStage::AwaitingPromotion
        } else {
            JobStage::Pending
        }
    }

    /// Move a fully verified job into the completed area.
    ///
    /// Steps, each safe to repeat after a failure:
    /// 1. record the awaiting-promotion sentinel
    /// 2. rename every content entry into `completed/<name>`
    /// 3. delete the marker, then the sentinel
    /// 4. remove the now-empty staging directory
    ///
    /// If a rename fails the staging directory keeps its marker and sentinel,
    /// and the next call moves whatever is left.
    pub fn promote_job(&self, job_dir: &Path) -> Result<PathBuf, EngineError> {
        let name = job_dir.file_name().ok_or_else(|| {
            EngineError::storage(
                "promote job",
                job_dir,
                io::Error::new(io::ErrorKind::InvalidInput, "job path has no directory name"),
            )
        })?;
        let target_dir = self.completed_root.join(name);

        self.mark_awaiting_promotion(job_dir)?;

        fs::create_dir_all(&target_dir)
            .map_err(|e| EngineError::storage("create completed directory", &target_dir, e))?;

        let entries = fs::read_dir(job_dir)
            .map_err(|e| EngineError::storage("list job directory", job_dir, e))?;

        let mut moved = 0usize;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::storage("list job directory", job_dir, e))?;
            let file_name = entry.file_name();
            if is_reserved_name(&file_name.to_string_lossy()) {
                continue;
            }

            let source = entry.path();
            let target = target_dir.join(&file_name);
            fs::rename(&source, &target).map_err(|e| EngineError::storage("relocate", &source, e))?;
            moved += 1;
        }

        self.delete_remote_folder_id(job_dir)?;
        remove_if_present(&job_dir.join(PROMOTION_FILE_NAME))?;
        remove_if_present(&job_dir.join(MARKER_TEMP_FILE_NAME))?;

        fs::remove_dir(job_dir)
            .map_err(|e| EngineError::storage("remove staging directory", job_dir, e))?;

        info!(
            job = %name.to_string_lossy(),
            moved,
            target = %target_dir.display(),
            "Promoted job to completed area"
        );
        Ok(target_dir)
    }

    fn mark_awaiting_promotion(&self, job_dir: &Path) -> Result<(), EngineError> {
        let sentinel = job_dir.join(PROMOTION_FILE_NAME);
        if sentinel.exists() {
            debug!(job = %job_dir.display(), "Resuming interrupted promotion");
            return Ok(());
        }
        fs::File::create(&sentinel)
            .and_then(|f| f.sync_all())
            .map_err(|e| EngineError::storage("write promotion sentinel", &sentinel, e))
    }

    /// Summarize a pending job directory.
    pub fn inspect(&self, job: &PendingJob) -> Result<JobStatus, EngineError> {
        let folder_id = match self.read_remote_folder_id(&job.path) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(job = %job.name, error = %e, "Job marker unreadable");
                None
            }
        };

        let entries = fs::read_dir(&job.path)
            .map_err(|e| EngineError::storage("list job directory", &job.path, e))?;
        let mut local_bytes = 0;
        for entry in entries {
            let entry =
                entry.map_err(|e| EngineError::storage("list job directory", &job.path, e))?;
            if is_reserved_name(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|e| EngineError::storage("stat", entry.path(), e))?;
            if metadata.is_file() {
                local_bytes += metadata.len();
            }
        }

        Ok(JobStatus {
            name: job.name.clone(),
            path: job.path.clone(),
            folder_id,
            stage: self.job_stage(&job.path),
            local_bytes,
        })
    }
}

fn remove_if_present(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::storage("remove", path, e)),
    }
}

/// Lazy listing of job directories in the incomplete area.
#[derive(Debug)]
pub struct PendingJobs {
    root: PathBuf,
    entries: fs::ReadDir,
}

impl Iterator for PendingJobs {
    type Item = Result<PendingJob, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(EngineError::storage(
                        "list incomplete area",
                        &self.root,
                        e,
                    )))
                }
            };

            // Entries can vanish between listing and stat when a job is promoted
            // or removed concurrently.
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Some(Err(EngineError::storage("stat", entry.path(), e))),
            };
            if !file_type.is_dir() {
                continue;
            }

            return Some(Ok(PendingJob {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, JobDirectoryStore) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let layout = Layout::under(temp_dir.path());
        layout.prepare().expect("Failed to prepare layout");
        (temp_dir, JobDirectoryStore::new(&layout))
    }

    fn pending_names(store: &JobDirectoryStore) -> Vec<String> {
        let mut names: Vec<String> = store
            .list_pending_jobs()
            .expect("Listing should succeed")
            .map(|job| job.expect("Entry should be readable").name)
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_create_writes_only_marker() {
        let (_temp_dir, store) = store();
        let path = store
            .create_job_directory("folder-123", "Photos")
            .expect("Create should succeed");

        assert_eq!(path, store.incomplete_root().join("Photos"));
        let entries: Vec<_> = fs::read_dir(&path)
            .expect("Failed to read job dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![MARKER_FILE_NAME.to_string()]);
        assert_eq!(
            fs::read_to_string(path.join(MARKER_FILE_NAME)).expect("Failed to read marker"),
            "folder-123"
        );
    }

    #[test]
    fn test_create_rejects_duplicate_job() {
        let (_temp_dir, store) = store();
        store
            .create_job_directory("folder-123", "Photos")
            .expect("Create should succeed");

        let result = store.create_job_directory("folder-456", "Photos");
        assert!(matches!(result, Err(EngineError::JobExists { .. })));
        assert_eq!(
            store
                .read_remote_folder_id(&store.incomplete_root().join("Photos"))
                .expect("Marker should be intact"),
            "folder-123"
        );
    }

    #[test]
    fn test_create_rejects_invalid_names() {
        let (_temp_dir, store) = store();
        for name in ["", "..", "a/b", MARKER_FILE_NAME] {
            let result = store.create_job_directory("folder-123", name);
            assert!(matches!(result, Err(EngineError::Metadata { .. })), "{:?} accepted", name);
        }
        assert!(store.create_job_directory("  ", "Photos").is_err());
    }

    #[test]
    fn test_create_fails_when_root_is_a_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let layout = Layout::under(temp_dir.path());
        fs::write(temp_dir.path().join("incomplete"), b"not a dir").expect("Failed to write file");
        let store = JobDirectoryStore::new(&layout);

        let result = store.create_job_directory("folder-123", "Photos");
        assert!(matches!(result, Err(EngineError::Storage { .. })));
    }

    #[test]
    fn test_list_pending_jobs_is_restartable() {
        let (_temp_dir, store) = store();
        store.create_job_directory("f1", "A").expect("Create A");
        fs::write(store.incomplete_root().join("stray.txt"), b"x")
            .expect("Failed to write stray file");

        assert_eq!(pending_names(&store), vec!["A"]);

        store.create_job_directory("f2", "B").expect("Create B");
        assert_eq!(pending_names(&store), vec!["A", "B"]);

        let job = store
            .list_pending_jobs()
            .expect("Listing should succeed")
            .map(|j| j.expect("entry"))
            .find(|j| j.name == "B")
            .expect("B should be listed");
        assert_eq!(job.path, store.incomplete_root().join("B"));
    }

    #[test]
    fn test_list_pending_jobs_missing_root() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let store = JobDirectoryStore::new(&Layout::under(&temp_dir.path().join("nowhere")));
        assert!(matches!(store.list_pending_jobs(), Err(EngineError::Storage { .. })));
    }

    #[test]
    fn test_read_missing_or_empty_marker() {
        let (_temp_dir, store) = store();
        let dir = store.incomplete_root().join("Manual");
        fs::create_dir(&dir).expect("Failed to create dir");

        let result = store.read_remote_folder_id(&dir);
        assert!(matches!(result, Err(EngineError::MissingState { .. })));

        fs::write(dir.join(MARKER_FILE_NAME), b"  \n").expect("Failed to write marker");
        let result = store.read_remote_folder_id(&dir);
        assert!(matches!(result, Err(EngineError::MissingState { .. })));

        fs::write(dir.join(MARKER_FILE_NAME), b"folder-9\n").expect("Failed to write marker");
        assert_eq!(store.read_remote_folder_id(&dir).expect("Read should succeed"), "folder-9");
    }

    #[test]
    fn test_delete_marker_is_idempotent() {
        let (_temp_dir, store) = store();
        let path = store.create_job_directory("folder-123", "Photos").expect("Create");

        store.delete_remote_folder_id(&path).expect("First delete");
        assert!(!path.join(MARKER_FILE_NAME).exists());
        store.delete_remote_folder_id(&path).expect("Second delete");
    }

    #[test]
    fn test_promote_moves_content_and_removes_staging() {
        let (_temp_dir, store) = store();
        let path = store.create_job_directory("folder-123", "Photos").expect("Create");
        fs::write(path.join("a.jpg"), b"aaaa").expect("Failed to write a.jpg");
        fs::write(path.join("b.jpg"), b"bb").expect("Failed to write b.jpg");

        let target = store.promote_job(&path).expect("Promote should succeed");

        assert_eq!(target, store.completed_root().join("Photos"));
        assert!(!path.exists(), "Staging directory should be removed");
        assert_eq!(fs::read(target.join("a.jpg")).expect("a.jpg"), b"aaaa");
        assert_eq!(fs::read(target.join("b.jpg")).expect("b.jpg"), b"bb");
        assert!(!target.join(MARKER_FILE_NAME).exists());
        assert!(!target.join(PROMOTION_FILE_NAME).exists());
    }

    #[test]
    fn test_promote_resumes_after_partial_failure() {
        let (_temp_dir, store) = store();
        let path = store.create_job_directory("folder-123", "Photos").expect("Create");
        fs::write(path.join("a.jpg"), b"aaaa").expect("Failed to write a.jpg");
        fs::write(path.join("b.jpg"), b"bb").expect("Failed to write b.jpg");

        // A non-empty directory in the way makes renaming b.jpg fail.
        let blocker = store.completed_root().join("Photos").join("b.jpg");
        fs::create_dir_all(blocker.join("inner")).expect("Failed to create blocker");

        let result = store.promote_job(&path);
        assert!(matches!(result, Err(EngineError::Storage { operation: "relocate", .. })));
        assert!(path.exists(), "Staging directory must survive a failed promotion");
        assert!(path.join(MARKER_FILE_NAME).exists(), "Marker must survive a failed promotion");
        assert_eq!(store.job_stage(&path), JobStage::AwaitingPromotion);

        fs::remove_dir_all(&blocker).expect("Failed to remove blocker");

        let target = store.promote_job(&path).expect("Retry should succeed");
        assert!(!path.exists());
        assert_eq!(fs::read(target.join("a.jpg")).expect("a.jpg"), b"aaaa");
        assert_eq!(fs::read(target.join("b.jpg")).expect("b.jpg"), b"bb");
    }

    #[test]
    fn test_promote_with_items_already_moved() {
        let (_temp_dir, store) = store();
        let path = store.create_job_directory("folder-123", "Photos").expect("Create");
        fs::write(path.join("b.jpg"), b"bb").expect("Failed to write b.jpg");

        // Simulate an earlier interrupted promotion that already moved a.jpg.
        fs::File::create(path.join(PROMOTION_FILE_NAME)).expect("Failed to write sentinel");
        let target = store.completed_root().join("Photos");
        fs::create_dir_all(&target).expect("Failed to create target");
        fs::write(target.join("a.jpg"), b"aaaa").expect("Failed to write moved a.jpg");

        store.promote_job(&path).expect("Promote should succeed");
        assert!(!path.exists());
        assert!(target.join("a.jpg").exists());
        assert!(target.join("b.jpg").exists());
    }

    #[test]
    fn test_job_stage_and_inspect() {
        let (_temp_dir, store) = store();
        let path = store.create_job_directory("folder-123", "Photos").expect("Create");
        fs::write(path.join("a.jpg"), vec![0u8; 40]).expect("Failed to write a.jpg");

        let pending = PendingJob {
            name: "Photos".into(),
            path: path.clone(),
        };
        let status = store.inspect(&pending).expect("Inspect should succeed");
        assert_eq!(status.folder_id.as_deref(), Some("folder-123"));
        assert_eq!(status.stage, JobStage::Pending);
        assert_eq!(status.local_bytes, 40);

        fs::remove_file(path.join(MARKER_FILE_NAME)).expect("Failed to remove marker");
        fs::File::create(path.join(PROMOTION_FILE_NAME)).expect("Failed to write sentinel");
        let status = store.inspect(&pending).expect("Inspect should succeed");
        assert_eq!(status.folder_id, None);
        assert_eq!(status.stage, JobStage::AwaitingPromotion);
    }

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("a.jpg").is_ok());
        assert!(validate_entry_name(".hidden").is_ok());
        assert!(validate_entry_name(PROMOTION_FILE_NAME).is_err());
        assert!(validate_entry_name("..\\x").is_err());
    }
}
