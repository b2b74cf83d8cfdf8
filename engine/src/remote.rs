//! Remote store capability.
//!
//! The engine consumes a remote file store through the [`RemoteStore`] trait:
//! folder lookup, flat folder listing and open-ended byte-range reads.
//! [`FsRemoteStore`] implements it over a local directory tree, which is what
//! the CLI uses against a mounted share.

use crate::checksums::{compute_file_checksum, ChecksumAlgorithm};
use crate::error::RemoteError;
use crate::model::{RemoteFile, RemoteFolder};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// A remote file-storage provider.
pub trait RemoteStore: Send + Sync {
    /// Look up a folder by id.
    fn folder(&self, folder_id: &str) -> Result<RemoteFolder, RemoteError>;

    /// List the files directly inside a folder.
    fn list_folder_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>, RemoteError>;

    /// Stream a file's content from `offset` to its end.
    fn fetch_content(
        &self,
        file_id: &str,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, RemoteError>;
}

/// Key identifying an unchanged file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedChecksum {
    len: u64,
    modified: Option<SystemTime>,
    checksum: String,
}

/// A [`RemoteStore`] backed by a directory tree.
///
/// Folder and file ids are paths relative to the root. Checksums are computed
/// with the configured algorithm and cached until the file's size or
/// modification time changes.
#[derive(Debug)]
pub struct FsRemoteStore {
    root: PathBuf,
    algorithm: ChecksumAlgorithm,
    checksum_cache: Mutex<HashMap<PathBuf, CachedChecksum>>,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>, algorithm: ChecksumAlgorithm) -> Self {
        FsRemoteStore {
            root: root.into(),
            algorithm,
            checksum_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an id to a path under the root, rejecting ids that would escape it.
    fn resolve(&self, id: &str) -> Result<PathBuf, RemoteError> {
        let relative = Path::new(id);
        if id.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(RemoteError::Other(format!("invalid remote id '{}'", id)));
        }
        Ok(self.root.join(relative))
    }

    fn checksum(&self, path: &Path, metadata: &fs::Metadata) -> Result<String, RemoteError> {
        let len = metadata.len();
        let modified = metadata.modified().ok();

        if let Ok(cache) = self.checksum_cache.lock() {
            if let Some(cached) = cache.get(path) {
                if cached.len == len && cached.modified == modified {
                    return Ok(cached.checksum.clone());
                }
            }
        }

        let checksum = compute_file_checksum(path, self.algorithm)
            .map_err(|e| RemoteError::Other(e.to_string()))?;

        if let Ok(mut cache) = self.checksum_cache.lock() {
            cache.insert(
                path.to_path_buf(),
                CachedChecksum {
                    len,
                    modified,
                    checksum: checksum.clone(),
                },
            );
        }

        Ok(checksum)
    }

    /// Drop cached checksums of files directly inside `folder` that are not in `listed`.
    fn prune_cache(&self, folder: &Path, listed: &HashSet<PathBuf>) {
        if let Ok(mut cache) = self.checksum_cache.lock() {
            cache.retain(|path, _| path.parent() != Some(folder) || listed.contains(path));
        }
    }
}

fn not_found_or(err: io::Error, not_found: RemoteError) -> RemoteError {
    if err.kind() == io::ErrorKind::NotFound {
        not_found
    } else {
        RemoteError::Io(err)
    }
}

impl RemoteStore for FsRemoteStore {
    fn folder(&self, folder_id: &str) -> Result<RemoteFolder, RemoteError> {
        let path = self.resolve(folder_id)?;
        let metadata = fs::metadata(&path)
            .map_err(|e| not_found_or(e, RemoteError::FolderNotFound(folder_id.to_string())))?;
        if !metadata.is_dir() {
            return Err(RemoteError::FolderNotFound(folder_id.to_string()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| folder_id.to_string());

        Ok(RemoteFolder {
            id: folder_id.to_string(),
            name,
        })
    }

    fn list_folder_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let path = self.resolve(folder_id)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    self.prune_cache(&path, &HashSet::new());
                }
                return Err(not_found_or(e, RemoteError::FolderNotFound(folder_id.to_string())));
            }
        };

        let mut files = Vec::new();
        let mut listed = HashSet::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let file_path = entry.path();
            let checksum = self.checksum(&file_path, &metadata)?;
            listed.insert(file_path);

            files.push(RemoteFile {
                id: format!("{}/{}", folder_id.trim_end_matches('/'), name),
                name,
                size: metadata.len(),
                checksum,
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        self.prune_cache(&path, &listed);
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn fetch_content(
        &self,
        file_id: &str,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, RemoteError> {
        let path = self.resolve(file_id)?;
        let mut file = fs::File::open(&path)
            .map_err(|e| not_found_or(e, RemoteError::FileNotFound(file_id.to_string())))?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(Box::new(file))
    }
}
