//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Copying files with modification-time preservation
//! - Creating directories recursively
//! - Deleting files and removing the directories they leave empty

use crate::error::EngineError;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copy a file from source to destination, preserving its modification time.
///
/// The destination is written in place: an interrupted copy leaves a partial
/// file that the next run detects by size or time and copies again.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns EngineError if reading, writing, or setting the timestamp fails
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;

    let src_metadata = src_file.metadata().map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_mtime = filetime::FileTime::from_last_modification_time(&src_metadata);

    let mut dst_file = fs::File::create(dst).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    let bytes_copied = io::copy(&mut src_file, &mut dst_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    drop(dst_file);

    filetime::set_file_mtime(dst, src_mtime).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if directory creation fails or the parent is a file
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(parent).map_err(|e| EngineError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        }),
    }
}

/// Delete a single file.
pub fn delete_file(path: &Path) -> Result<(), EngineError> {
    fs::remove_file(path).map_err(|e| EngineError::DeleteError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Remove directories left empty by deleting `deleted`, deepest first.
///
/// Only ancestors of the deleted files strictly below `root` are candidates;
/// empty directories elsewhere in the tree are left alone. A directory that
/// still has entries (excluded files included) stays.
///
/// # Returns
/// Number of directories removed
pub fn prune_emptied_dirs(root: &Path, deleted: &[PathBuf]) -> usize {
    let mut candidates = BTreeSet::new();
    for file in deleted {
        for dir in file.ancestors().skip(1) {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            candidates.insert(dir.to_path_buf());
        }
    }

    let mut ordered: Vec<PathBuf> = candidates.into_iter().collect();
    ordered.sort_by_key(|dir| Reverse(dir.components().count()));

    let mut removed = 0;
    for dir in ordered {
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty && fs::remove_dir(&dir).is_ok() {
            debug!("Removed empty directory {}", dir.display());
            removed += 1;
        }
    }

    removed
}
