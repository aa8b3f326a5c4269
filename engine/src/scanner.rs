//! Directory scanning.
//!
//! Walks a root directory and produces an `Inventory` of regular files.
//! Excluded directories are pruned so their subtrees are never visited.
//! Entries that cannot be read are recorded as failures and the walk
//! continues; only an unreadable root aborts the scan.

use crate::cloud::PlaceholderDetector;
use crate::error::EngineError;
use crate::model::{FileRecord, Inventory, ItemAction, ItemResult};
use crate::progress::{emit, stop_requested, ProgressCallback, StopFlag, SyncEvent};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// System, trash, and sync-client directories that are never scanned
/// (compared lowercase).
const EXCLUDED_DIR_NAMES: &[&str] = &[
    "$recycle.bin",
    "system volume information",
    "recycled",
    "recycler",
    "$windows.~bt",
    "$windows.~ws",
    "windows.old",
    ".trashes",
    ".trash-1000",
    ".dropbox.cache",
    "onedrive.tmp",
    ".tmp",
    ".temp",
    "temp",
    "tmp",
    ".synologyworkingdirectory",
];

/// Substrings that exclude a directory wherever they appear in its path.
const EXCLUDED_PATH_MARKERS: &[&str] = &["$recycle.bin", ".synologyworkingdirectory"];

const EXCLUDED_FILE_EXTENSIONS: &[&str] = &[".tmp", ".temp", ".ini", ".lnk", ".db"];

const EXCLUDED_FILE_NAMES: &[&str] = &["thumbs.db", "desktop.ini"];

/// True if a directory below `root` must be pruned from the walk.
pub fn is_excluded_dir(root: &Path, dir: &Path) -> bool {
    let name = match dir.file_name() {
        Some(name) => name.to_string_lossy().to_lowercase(),
        None => return false,
    };

    if name.starts_with('.') || EXCLUDED_DIR_NAMES.contains(&name.as_str()) {
        return true;
    }

    let relative = dir
        .strip_prefix(root)
        .unwrap_or(dir)
        .to_string_lossy()
        .to_lowercase();
    if EXCLUDED_PATH_MARKERS.iter().any(|m| relative.contains(m)) {
        return true;
    }

    // OneDrive version history
    let parent = dir
        .parent()
        .and_then(|p| p.file_name())
        .map(|p| p.to_string_lossy().to_lowercase());
    name == "versions" && parent.as_deref() == Some("onedrive")
}

/// True if a file name is a temp, shortcut, or system file.
pub fn is_excluded_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    name.starts_with('~')
        || EXCLUDED_FILE_NAMES.contains(&lower.as_str())
        || EXCLUDED_FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Descend into subdirectories
    pub recurse: bool,

    /// Emit a `ScanProgress` event every this many enumerated files (0 disables)
    pub progress_interval: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            recurse: true,
            progress_interval: 100,
        }
    }
}

/// Builds an `Inventory` for one root.
pub struct Scanner<'a> {
    options: ScanOptions,
    detector: Option<&'a dyn PlaceholderDetector>,
    progress: Option<&'a dyn ProgressCallback>,
    stop: Option<&'a StopFlag>,
}

impl<'a> Scanner<'a> {
    pub fn new(options: ScanOptions) -> Self {
        Scanner {
            options,
            detector: None,
            progress: None,
            stop: None,
        }
    }

    /// Flag remote-only placeholders using `detector`. Without a detector no
    /// file is flagged.
    pub fn with_detector(mut self, detector: &'a dyn PlaceholderDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stop(mut self, stop: &'a StopFlag) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Scan `root`.
    ///
    /// # Errors
    /// Fails if the root is missing, not a directory, or unreadable, and
    /// with `Cancelled` if a stop is requested mid-walk.
    pub fn scan(&self, root: &Path) -> Result<Inventory, EngineError> {
        check_root(root)?;
        info!("Scanning {}", root.display());
        emit(self.progress, || SyncEvent::ScanStarted {
            root: root.to_path_buf(),
        });

        let mut inventory = Inventory {
            root: root.to_path_buf(),
            ..Inventory::default()
        };
        let mut excluded_dirs = 0;
        let mut files_seen = 0;

        let max_depth = if self.options.recurse { usize::MAX } else { 1 };
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() > 0 && entry.file_type().is_dir() && is_excluded_dir(root, entry.path()) {
                    debug!("Excluding directory {}", entry.path().display());
                    excluded_dirs += 1;
                    return false;
                }
                true
            });

        for item in walker {
            if stop_requested(self.stop) {
                info!("Scan of {} cancelled", root.display());
                return Err(EngineError::Cancelled);
            }

            let entry = match item {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        return Err(EngineError::RootAccessDenied {
                            path: root.to_path_buf(),
                            source: err.into(),
                        });
                    }
                    let path = err.path().unwrap_or(root).to_path_buf();
                    let error = EngineError::EnumerationFailed {
                        path: path.clone(),
                        source: io::Error::from(err),
                    };
                    self.record_failure(&mut inventory, &path, &error);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            files_seen += 1;
            if is_excluded_file(&entry.file_name().to_string_lossy()) {
                inventory.excluded_files += 1;
            } else {
                match self.build_record(root, &entry) {
                    Ok(Some(record)) => {
                        if record.is_remote_placeholder {
                            inventory.remote_only += 1;
                        }
                        inventory.files.push(record);
                    }
                    Ok(None) => {}
                    Err(error) => self.record_failure(&mut inventory, entry.path(), &error),
                }
            }

            if self.options.progress_interval > 0 && files_seen % self.options.progress_interval == 0 {
                emit(self.progress, || SyncEvent::ScanProgress {
                    root: root.to_path_buf(),
                    files_seen,
                    files_found: inventory.files.len(),
                });
            }
        }

        inventory.excluded_dirs = excluded_dirs;

        info!(
            "Found {} files in {} ({} bytes, {} directories and {} files excluded)",
            inventory.files.len(),
            root.display(),
            inventory.total_bytes(),
            inventory.excluded_dirs,
            inventory.excluded_files
        );
        if inventory.remote_only > 0 {
            info!("{} files are cloud-only placeholders", inventory.remote_only);
        }
        emit(self.progress, || SyncEvent::ScanCompleted {
            root: root.to_path_buf(),
            files: inventory.files.len(),
            total_bytes: inventory.total_bytes(),
            excluded_dirs: inventory.excluded_dirs,
            excluded_files: inventory.excluded_files,
            remote_only: inventory.remote_only,
        });

        Ok(inventory)
    }

    /// Stat one entry. `Ok(None)` for entries that are not regular files
    /// (sockets, symlinks to directories).
    fn build_record(&self, root: &Path, entry: &DirEntry) -> Result<Option<FileRecord>, EngineError> {
        let path = entry.path();
        let read_err = |source: io::Error| EngineError::ReadError {
            path: path.to_path_buf(),
            source,
        };

        let metadata = if entry.path_is_symlink() {
            fs::metadata(path).map_err(read_err)?
        } else {
            entry.metadata().map_err(|e| read_err(e.into()))?
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        let modified = metadata.modified().map_err(read_err)?;
        let is_remote_placeholder = self
            .detector
            .map(|d| d.is_remote_only(path, &metadata))
            .unwrap_or(false);

        Ok(Some(FileRecord {
            absolute_path: path.to_path_buf(),
            relative_path: path.strip_prefix(root).unwrap_or(path).to_path_buf(),
            size: metadata.len(),
            modified,
            is_remote_placeholder,
        }))
    }

    fn record_failure(&self, inventory: &mut Inventory, path: &Path, error: &EngineError) {
        warn!("Cannot access {}: {}", path.display(), error.detailed());
        let result = ItemResult::failed(ItemAction::Scan, path, error);
        emit(self.progress, || SyncEvent::ItemFailed {
            result: result.clone(),
        });
        inventory.failures.push(result);
    }
}

/// Verify that `root` exists, is a directory, and can be listed.
pub fn check_root(root: &Path) -> Result<(), EngineError> {
    match fs::metadata(root) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(EngineError::InvalidRoot {
                path: root.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: root.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(EngineError::RootAccessDenied {
                path: root.to_path_buf(),
                source: e,
            })
        }
    }

    fs::read_dir(root)
        .map(|_| ())
        .map_err(|e| EngineError::RootAccessDenied {
            path: root.to_path_buf(),
            source: e,
        })
}
