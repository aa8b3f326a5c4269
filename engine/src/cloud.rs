//! Cloud placeholder detection.
//!
//! Sync clients (OneDrive, iCloud, Dropbox) leave directory entries for files
//! whose content lives only in the cloud. Reading such a file triggers a
//! download, so the pipeline asks a `PlaceholderDetector` first. Detection
//! only looks at metadata and never opens the file.
//!
//! Errors and unknowns answer `false`: treating a placeholder as local costs a
//! redundant comparison, while the reverse would skip files that need syncing.

use std::fs::Metadata;
use std::path::{Component, Path};

/// Folder names (lowercase substrings) that mark a sync client's root.
pub const CLOUD_FOLDER_MARKERS: &[&str] = &[
    "onedrive",
    "icloud",
    "mobile documents",
    "dropbox",
    "google drive",
    "googledrive",
];

/// True if any component of `path` looks like a cloud sync client folder
/// (`~/OneDrive`, `OneDrive - Contoso`, `~/Library/Mobile Documents`).
/// Placeholders only exist below such a folder.
pub fn is_cloud_synced_path(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(part) => {
            let name = part.to_string_lossy().to_lowercase();
            CLOUD_FOLDER_MARKERS.iter().any(|marker| name.contains(marker))
        }
        _ => false,
    })
}

/// Decides whether a file's content is stored only remotely.
pub trait PlaceholderDetector: Send + Sync {
    fn is_remote_only(&self, path: &Path, metadata: &Metadata) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Windows file-attribute check.
///
/// Cloud Files placeholders carry `RECALL_ON_OPEN` or `RECALL_ON_DATA_ACCESS`;
/// older HSM-style stubs carry `OFFLINE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeDetector;

impl AttributeDetector {
    pub const FILE_ATTRIBUTE_OFFLINE: u32 = 0x0000_1000;
    pub const FILE_ATTRIBUTE_RECALL_ON_OPEN: u32 = 0x0004_0000;
    pub const FILE_ATTRIBUTE_RECALL_ON_DATA_ACCESS: u32 = 0x0040_0000;

    pub fn attributes_indicate_remote(attributes: u32) -> bool {
        attributes
            & (Self::FILE_ATTRIBUTE_OFFLINE
                | Self::FILE_ATTRIBUTE_RECALL_ON_OPEN
                | Self::FILE_ATTRIBUTE_RECALL_ON_DATA_ACCESS)
            != 0
    }
}

impl PlaceholderDetector for AttributeDetector {
    #[cfg(windows)]
    fn is_remote_only(&self, _path: &Path, metadata: &Metadata) -> bool {
        use std::os::windows::fs::MetadataExt;
        Self::attributes_indicate_remote(metadata.file_attributes())
    }

    #[cfg(not(windows))]
    fn is_remote_only(&self, _path: &Path, _metadata: &Metadata) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "file-attributes"
    }
}

/// Allocated-size heuristic: a file whose on-disk allocation is under 10% of
/// its logical size is assumed to be a placeholder.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeHeuristicDetector;

impl SizeHeuristicDetector {
    pub fn allocation_indicates_remote(logical_size: u64, allocated_size: u64) -> bool {
        logical_size > 0 && allocated_size.saturating_mul(10) < logical_size
    }
}

impl PlaceholderDetector for SizeHeuristicDetector {
    #[cfg(unix)]
    fn is_remote_only(&self, _path: &Path, metadata: &Metadata) -> bool {
        use std::os::unix::fs::MetadataExt;
        // st_blocks is always in 512-byte units
        Self::allocation_indicates_remote(metadata.len(), metadata.blocks().saturating_mul(512))
    }

    #[cfg(not(unix))]
    fn is_remote_only(&self, _path: &Path, _metadata: &Metadata) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "allocation-size"
    }
}

/// Pick the detector for the platform we are running on.
pub fn default_detector() -> Box<dyn PlaceholderDetector> {
    if cfg!(windows) {
        Box::new(AttributeDetector)
    } else {
        Box::new(SizeHeuristicDetector)
    }
}
