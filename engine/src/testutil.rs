//! In-memory remote store with failure injection, for unit tests.

use crate::checksums::{checksum_bytes, ChecksumAlgorithm};
use crate::error::RemoteError;
use crate::model::{RemoteFile, RemoteFolder};
use crate::remote::RemoteStore;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::sync::Mutex;

#[derive(Default)]
struct MemoryState {
    folders: HashMap<String, (String, Vec<String>)>,
    files: HashMap<String, (RemoteFile, Vec<u8>)>,
    failing_listings: HashSet<String>,
    failing_fetches: HashMap<String, usize>,
    interrupt_after: Option<usize>,
    end_streams_after: Option<usize>,
    fetch_log: Vec<(String, u64)>,
}

pub(crate) struct MemoryRemote {
    algorithm: ChecksumAlgorithm,
    state: Mutex<MemoryState>,
}

impl MemoryRemote {
    pub(crate) fn new() -> Self {
        MemoryRemote {
            algorithm: ChecksumAlgorithm::Md5,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub(crate) fn add_folder(&self, folder_id: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .folders
            .insert(folder_id.to_string(), (name.to_string(), Vec::new()));
    }

    /// Add a file whose declared size and checksum match `content`.
    pub(crate) fn add_file(
        &self,
        folder_id: &str,
        file_id: &str,
        name: &str,
        content: &[u8],
    ) -> RemoteFile {
        let file = RemoteFile {
            id: file_id.to_string(),
            name: name.to_string(),
            size: content.len() as u64,
            checksum: checksum_bytes(self.algorithm, content),
            modified: None,
        };
        self.add_file_with(folder_id, file.clone(), content);
        file
    }

    /// Add a file with arbitrary declared metadata.
    pub(crate) fn add_file_with(&self, folder_id: &str, file: RemoteFile, content: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state
            .folders
            .entry(folder_id.to_string())
            .or_insert_with(|| (folder_id.to_string(), Vec::new()))
            .1
            .push(file.id.clone());
        state.files.insert(file.id.clone(), (file, content.to_vec()));
    }

    pub(crate) fn fail_listing(&self, folder_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_listings
            .insert(folder_id.to_string());
    }

    /// Make the next `times` fetches of `file_id` fail.
    pub(crate) fn fail_fetches(&self, file_id: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failing_fetches
            .insert(file_id.to_string(), times);
    }

    /// Cut every content stream after `bytes` bytes with a connection reset.
    pub(crate) fn interrupt_streams_after(&self, bytes: Option<usize>) {
        self.state.lock().unwrap().interrupt_after = bytes;
    }

    /// End every content stream cleanly after `bytes` bytes, short of the declared size.
    pub(crate) fn end_streams_after(&self, bytes: Option<usize>) {
        self.state.lock().unwrap().end_streams_after = bytes;
    }

    /// Every fetch made so far, as (file id, offset).
    pub(crate) fn fetches(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().fetch_log.clone()
    }
}

impl RemoteStore for MemoryRemote {
    fn folder(&self, folder_id: &str) -> Result<RemoteFolder, RemoteError> {
        let state = self.state.lock().unwrap();
        state
            .folders
            .get(folder_id)
            .map(|(name, _)| RemoteFolder {
                id: folder_id.to_string(),
                name: name.clone(),
            })
            .ok_or_else(|| RemoteError::FolderNotFound(folder_id.to_string()))
    }

    fn list_folder_files(&self, folder_id: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        let state = self.state.lock().unwrap();
        if state.failing_listings.contains(folder_id) {
            return Err(RemoteError::Other(format!("listing {} unavailable", folder_id)));
        }
        let (_, ids) = state
            .folders
            .get(folder_id)
            .ok_or_else(|| RemoteError::FolderNotFound(folder_id.to_string()))?;
        Ok(ids.iter().map(|id| state.files[id].0.clone()).collect())
    }

    fn fetch_content(
        &self,
        file_id: &str,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_log.push((file_id.to_string(), offset));

        if let Some(remaining) = state.failing_fetches.get_mut(file_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Other(format!("fetch {} unavailable", file_id)));
            }
        }

        let (_, content) = state
            .files
            .get(file_id)
            .ok_or_else(|| RemoteError::FileNotFound(file_id.to_string()))?;
        let start = (offset as usize).min(content.len());
        let end = match state.end_streams_after {
            Some(bytes) => (start + bytes).min(content.len()),
            None => content.len(),
        };
        Ok(Box::new(InterruptingReader {
            data: content[start..end].to_vec(),
            position: 0,
            limit: state.interrupt_after,
        }))
    }
}

/// Reader that fails with a connection reset after `limit` bytes.
struct InterruptingReader {
    data: Vec<u8>,
    position: usize,
    limit: Option<usize>,
}

impl Read for InterruptingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = match self.limit {
            Some(limit) if self.position >= limit && self.position < self.data.len() => {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }
            Some(limit) => limit.min(self.data.len()),
            None => self.data.len(),
        };
        let n = buf.len().min(end - self.position);
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}
