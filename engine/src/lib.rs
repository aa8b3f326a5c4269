//! # treesync - Differential Directory Sync Library
//!
//! A headless engine that keeps a destination tree in step with a source
//! tree. Designed as the foundation for multiple front ends (CLI,
//! automation).
//!
//! ## Overview
//!
//! A run scans both trees, compares them, and applies the result:
//! - Directory scanning with system, trash, and sync-client exclusions
//! - Change detection by size and modification time, then content hash
//! - A persistent hash cache so unchanged files are not re-read
//! - Cloud placeholder awareness: remote-only files are never downloaded
//! - Optional, confirmed deletion of destination-only files
//! - Progress reporting via callbacks (decoupled from UI technology)
//! - Per-file results; one bad file never aborts the run
//!
//! ## Basic Usage
//!
//! ```no_run
//! use treesync::{analyze_job, create_job, run_job, AutoConfirm, HashCache, SyncOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SyncOptions::default();
//! let mut cache = HashCache::open(options.resolved_cache_path(), options.checksum)?;
//!
//! let mut job = create_job("/music/library", "/mnt/backup/library", options)?;
//!
//! // Scan and compare
//! analyze_job(&mut job, &mut cache, None, None)?;
//! if let Some(plan) = &job.plan {
//!     println!("{} to copy, {} unchanged", plan.to_copy.len(), plan.to_skip.len());
//! }
//!
//! // Apply the plan
//! run_job(&mut job, &mut cache, &AutoConfirm, None, None)?;
//! if let Some(report) = &job.report {
//!     println!("Copied {} files", report.files_copied);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (FileRecord, SyncPlan, SyncReport)
//! - **error**: Error types and handling
//! - **scanner**: Tree walking and exclusion rules
//! - **cloud**: Remote-only placeholder detection
//! - **hash_cache**: Persistent path-to-hash cache
//! - **diff**: Source/destination comparison
//! - **executor**: Copying, deletion, and cache upkeep
//! - **job**: Job orchestration (create, analyze, run)
//! - **worker**: Background threads for analysis and execution
//! - **progress**: Progress events and cancellation
//! - **checksums**: Content hashing
//! - **config**: Options and config files

pub mod checksums;
pub mod cloud;
pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod fs_ops;
pub mod hash_cache;
pub mod job;
pub mod model;
pub mod progress;
pub mod scanner;
pub mod worker;

// Re-export main types and functions
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ContentHasher, FileHasher};
pub use cloud::{
    default_detector, is_cloud_synced_path, AttributeDetector, PlaceholderDetector,
    SizeHeuristicDetector,
};
pub use config::{default_cache_path, load_config, SyncOptions};
pub use diff::{DiffEngine, DiffOptions};
pub use error::EngineError;
pub use executor::{AutoConfirm, ConfirmDeletion, SyncExecutor};
pub use hash_cache::HashCache;
pub use job::{analyze_job, create_job, run_job, SyncJob};
pub use model::{
    format_bytes, DeletionSummary, FileRecord, Inventory, ItemAction, ItemOutcome, ItemResult,
    JobState, SyncPlan, SyncReport,
};
pub use progress::{ChannelProgress, ProgressCallback, StopFlag, SyncEvent};
pub use scanner::{ScanOptions, Scanner};
pub use worker::{spawn_analysis, spawn_execution, WorkerHandle, WorkerOutput};
