//! Configuration for the mirroring engine.
//!
//! Configuration is read from a TOML file and handed to each component at
//! construction time. Every field has a default, so a missing file or a
//! partial file is valid.

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::transfer::RetryPolicy;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the staging area under the downloads directory.
pub const INCOMPLETE_DIR_NAME: &str = "incomplete";

/// Name of the completed area under the downloads directory.
pub const COMPLETED_DIR_NAME: &str = "completed";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Directory holding the `incomplete/` and `completed/` areas
    pub downloads_dir: PathBuf,

    /// Seconds between processing ticks
    pub tick_interval_secs: u64,

    pub transfer: TransferConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Settings for single-file transfers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    /// Attempts per file per tick, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Algorithm the remote store declares checksums in
    pub checksum: ChecksumAlgorithm,
}

/// Settings for the filesystem-backed remote store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub root: PathBuf,
}

/// Logging settings, applied by the binary that installs the subscriber.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `mirror_engine=debug`
    pub level: String,
    /// Optional log file
    pub file: Option<PathBuf>,
    /// Also log to the console when a file is configured
    pub console: bool,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        MirrorConfig {
            downloads_dir: PathBuf::from("downloads"),
            tick_interval_secs: 5,
            transfer: TransferConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            checksum: ChecksumAlgorithm::Md5,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            root: PathBuf::from("remote"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            console: true,
            json: false,
        }
    }
}

impl MirrorConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MirrorConfig::default()),
            Err(e) => {
                return Err(EngineError::Config {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        let config = Self::parse(&content).map_err(|reason| EngineError::Config {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, String> {
        let config: MirrorConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the type system cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_secs == 0 {
            return Err("tick_interval_secs must be greater than 0".to_string());
        }
        if self.transfer.max_attempts == 0 {
            return Err("transfer.max_attempts must be at least 1".to_string());
        }
        if self.transfer.initial_backoff_ms > self.transfer.max_backoff_ms {
            return Err(
                "transfer.initial_backoff_ms must not exceed transfer.max_backoff_ms".to_string(),
            );
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.transfer.max_attempts,
            initial_backoff: Duration::from_millis(self.transfer.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.transfer.max_backoff_ms),
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::under(&self.downloads_dir)
    }
}

/// The staging and completed roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub incomplete: PathBuf,
    pub completed: PathBuf,
}

impl Layout {
    /// Standard layout under a downloads directory.
    pub fn under(downloads_dir: &Path) -> Self {
        Layout {
            incomplete: downloads_dir.join(INCOMPLETE_DIR_NAME),
            completed: downloads_dir.join(COMPLETED_DIR_NAME),
        }
    }

    /// Create both roots if they do not exist yet.
    pub fn prepare(&self) -> Result<(), EngineError> {
        for dir in [&self.incomplete, &self.completed] {
            fs::create_dir_all(dir).map_err(|e| EngineError::storage("create root", dir, e))?;
        }
        Ok(())
    }
}
