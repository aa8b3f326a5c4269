//! Core data model for sync runs.
//!
//! This module defines the data that flows between the pipeline stages:
//! - FileRecord / Inventory: the result of scanning one tree
//! - SyncPlan: the diff between a source and a destination inventory
//! - ItemResult / SyncReport: per-file outcomes and the execution summary
//! - JobState: the per-run state machine

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// One regular file found by a scan.
///
/// Records are created fresh on every scan and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Full path on disk
    pub absolute_path: PathBuf,

    /// Path relative to the scan root; the matching key between trees
    pub relative_path: PathBuf,

    /// Logical size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,

    /// True if the content is not stored locally (destination scans only)
    pub is_remote_placeholder: bool,
}

impl FileRecord {
    /// Case-insensitive, separator-normalized key used to match source and destination.
    pub fn match_key(&self) -> String {
        relative_key(&self.relative_path)
    }

    /// Modification time as fractional seconds since the Unix epoch.
    pub fn modified_secs(&self) -> f64 {
        system_time_secs(self.modified)
    }
}

/// Build the matching key for a relative path: components joined by `/`, lowercased.
pub fn relative_key(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// Seconds since the Unix epoch, negative for times before it.
pub fn system_time_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

/// The files found under one root, plus what was left out and why.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Root the scan started from
    pub root: PathBuf,

    /// Regular files that passed the exclusion rules
    pub files: Vec<FileRecord>,

    /// Entries that could not be read (permission denied, vanished)
    pub failures: Vec<ItemResult>,

    /// Directories pruned by the exclusion rules
    pub excluded_dirs: usize,

    /// Files dropped by the exclusion rules
    pub excluded_files: usize,

    /// Files flagged as remote-only placeholders
    pub remote_only: usize,
}

impl Inventory {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Output of the diff stage: what to copy, what is already in sync, and what
/// exists only at the destination.
///
/// A plan is consumed exactly once by the executor.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Identifier carried into the report and logs
    pub id: Uuid,

    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub created_at: DateTime<Utc>,

    /// Whether content hashes were used; the executor refreshes the cache only then
    pub verify_hashes: bool,

    /// New or changed source files
    pub to_copy: Vec<FileRecord>,

    /// Source files already in sync
    pub to_skip: Vec<FileRecord>,

    /// Destination files with no source counterpart
    pub orphaned: Vec<FileRecord>,

    /// Sum of `to_copy` sizes
    pub total_copy_bytes: u64,

    /// Number of content hashes computed while diffing
    pub hashes_computed: usize,

    /// Scan and hash failures, and remote-only skips, from building the plan
    pub diagnostics: Vec<ItemResult>,
}

impl SyncPlan {
    pub fn skip_bytes(&self) -> u64 {
        self.to_skip.iter().map(|f| f.size).sum()
    }

    pub fn orphaned_bytes(&self) -> u64 {
        self.orphaned.iter().map(|f| f.size).sum()
    }

    /// True if executing the plan would change the destination.
    pub fn has_work(&self, delete_orphaned: bool) -> bool {
        !self.to_copy.is_empty() || (delete_orphaned && !self.orphaned.is_empty())
    }

    /// Destination path for a source record.
    pub fn destination_for(&self, record: &FileRecord) -> PathBuf {
        self.destination_root.join(&record.relative_path)
    }

    /// Scan and hash failures.
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.diagnostics.iter().filter(|i| i.is_failure())
    }

    /// Files left alone on purpose, with the reason.
    pub fn skipped(&self) -> impl Iterator<Item = &ItemResult> {
        self.diagnostics
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped { .. }))
    }

    /// What a deletion would remove, for the confirmation step.
    pub fn deletion_summary(&self) -> DeletionSummary {
        let mut largest = self.orphaned.clone();
        largest.sort_by(|a, b| b.size.cmp(&a.size));
        largest.truncate(DeletionSummary::SAMPLE_SIZE);

        DeletionSummary {
            count: self.orphaned.len(),
            total_bytes: self.orphaned_bytes(),
            largest,
        }
    }
}

/// Count, size and the largest entries of the orphaned set.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionSummary {
    pub count: usize,
    pub total_bytes: u64,
    pub largest: Vec<FileRecord>,
}

impl DeletionSummary {
    pub const SAMPLE_SIZE: usize = 10;
}

/// The kind of work an item result refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Scan,
    Hash,
    Copy,
    Delete,
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemOutcome {
    Success { bytes: u64 },
    Skipped { reason: String },
    Failed { cause: String, os_error: Option<i32> },
}

/// A per-file result, attributable to a specific path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResult {
    pub action: ItemAction,
    pub path: PathBuf,
    pub outcome: ItemOutcome,
}

impl ItemResult {
    pub fn success(action: ItemAction, path: impl Into<PathBuf>, bytes: u64) -> Self {
        ItemResult {
            action,
            path: path.into(),
            outcome: ItemOutcome::Success { bytes },
        }
    }

    pub fn skipped(action: ItemAction, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ItemResult {
            action,
            path: path.into(),
            outcome: ItemOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn failed(
        action: ItemAction,
        path: impl Into<PathBuf>,
        error: &crate::error::EngineError,
    ) -> Self {
        ItemResult {
            action,
            path: path.into(),
            outcome: ItemOutcome::Failed {
                cause: error.detailed(),
                os_error: error.raw_os_error(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Failed { .. })
    }
}

/// Summary of one execution, consumable by any presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub plan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_copied: usize,
    pub bytes_copied: u64,
    pub copy_failures: usize,
    pub files_deleted: usize,
    pub delete_failures: usize,

    /// Copied files whose hash could not be refreshed afterwards
    pub hash_failures: usize,

    pub empty_dirs_removed: usize,
    pub elapsed_secs: f64,

    /// Stop was requested before every item was processed
    pub cancelled: bool,

    /// Whether the final hash cache flush succeeded
    pub cache_saved: bool,

    /// Every copy, hash refresh failure and delete attempt, in processing order
    pub items: Vec<ItemResult>,
}

impl SyncReport {
    /// Average copy throughput in bytes per second.
    pub fn average_throughput(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.bytes_copied as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }

    pub fn has_failures(&self) -> bool {
        self.copy_failures > 0 || self.delete_failures > 0 || self.hash_failures > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|i| i.is_failure())
    }
}

/// The state of a sync job.
///
/// `Idle -> Scanning -> Diffing -> AwaitingConfirmation -> Executing -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// No operation in progress
    Idle,
    /// Enumerating source and destination trees
    Scanning,
    /// Classifying files
    Diffing,
    /// A plan is ready for review
    AwaitingConfirmation,
    /// Applying the plan
    Executing,
}

/// Format a byte count for humans ("512 bytes", "1.5 KB", "2.00 GB").
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KB {
        format!("{} bytes", bytes)
    } else if size < KB * KB {
        format!("{:.1} KB", size / KB)
    } else if size < KB * KB * KB {
        format!("{:.1} MB", size / (KB * KB))
    } else {
        format!("{:.2} GB", size / (KB * KB * KB))
    }
}
