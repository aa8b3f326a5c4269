//! Sync options and their TOML file form.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! verify_hashes = true
//! delete_orphaned = false
//! checksum = "blake3"
//! cache_path = "/var/lib/treesync/hashes.json"
//! ```

use crate::checksums::ChecksumAlgorithm;
use crate::cloud::is_cloud_synced_path;
use crate::diff::DiffOptions;
use crate::error::EngineError;
use crate::scanner::ScanOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the hash cache under the data directory.
pub const CACHE_FILE_NAME: &str = "file_hashes.json";

/// Options for one sync job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Compare content hashes when size and modification time agree
    pub verify_hashes: bool,

    /// Detect cloud placeholders in the destination and never download them
    pub cloud_aware: bool,

    /// Run placeholder detection even when the destination path does not
    /// look like a cloud sync folder
    pub assume_cloud_destination: bool,

    /// Delete destination files that have no source counterpart (asks first)
    pub delete_orphaned: bool,

    /// Descend into subdirectories
    pub recurse: bool,

    /// Content hash algorithm
    pub checksum: ChecksumAlgorithm,

    /// Hash cache location; `None` means `default_cache_path()`
    pub cache_path: Option<PathBuf>,

    /// Scan progress cadence in files
    pub progress_interval: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            verify_hashes: true,
            cloud_aware: true,
            assume_cloud_destination: false,
            delete_orphaned: false,
            recurse: true,
            checksum: ChecksumAlgorithm::Md5,
            cache_path: None,
            progress_interval: 100,
        }
    }
}

impl SyncOptions {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            recurse: self.recurse,
            progress_interval: self.progress_interval,
        }
    }

    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            verify_hashes: self.verify_hashes,
            cloud_aware: self.cloud_aware,
        }
    }

    /// Whether the destination scan should look for placeholders.
    ///
    /// Requires `cloud_aware`, and a destination inside a recognized sync
    /// client folder unless `assume_cloud_destination` is set.
    pub fn detects_placeholders(&self, destination: &Path) -> bool {
        self.cloud_aware && (self.assume_cloud_destination || is_cloud_synced_path(destination))
    }

    /// Configured cache path, falling back to the per-user default.
    pub fn resolved_cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(default_cache_path)
    }
}

/// `<local data dir>/treesync/file_hashes.json`, or the working directory
/// when the platform reports no data directory.
pub fn default_cache_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("treesync"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_FILE_NAME)
}

/// Read options from a TOML file.
pub fn load_config(path: &Path) -> Result<SyncOptions, EngineError> {
    let text = fs::read_to_string(path).map_err(|e| EngineError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_config(path, &text)
}

fn parse_config(path: &Path, text: &str) -> Result<SyncOptions, EngineError> {
    toml::from_str(text).map_err(|e| EngineError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
