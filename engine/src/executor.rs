//! Plan execution.
//!
//! Copies every `to_copy` entry into the destination, optionally deletes
//! orphans and the directories they leave empty, and keeps the hash cache in
//! step with what was written. Each file is attempted once; failures are
//! recorded and the loop moves on.

use crate::checksums::ContentHasher;
use crate::error::EngineError;
use crate::fs_ops;
use crate::hash_cache::HashCache;
use crate::model::{format_bytes, DeletionSummary, ItemAction, ItemResult, SyncPlan, SyncReport};
use crate::progress::{emit, stop_requested, ProgressCallback, StopFlag, SyncEvent};
use chrono::Utc;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Gate in front of destructive deletion.
///
/// Called once per execution, before any file is touched, with the count,
/// total size, and largest entries of the orphaned set.
pub trait ConfirmDeletion {
    fn confirm(&self, summary: &DeletionSummary) -> bool;
}

impl<F> ConfirmDeletion for F
where
    F: Fn(&DeletionSummary) -> bool,
{
    fn confirm(&self, summary: &DeletionSummary) -> bool {
        self(summary)
    }
}

/// Approves every deletion (unattended runs).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl ConfirmDeletion for AutoConfirm {
    fn confirm(&self, _summary: &DeletionSummary) -> bool {
        true
    }
}

/// Applies a `SyncPlan` to the destination.
pub struct SyncExecutor<'a> {
    cache: &'a mut HashCache,
    hasher: &'a dyn ContentHasher,
    progress: Option<&'a dyn ProgressCallback>,
    stop: Option<&'a StopFlag>,
}

impl<'a> SyncExecutor<'a> {
    pub fn new(cache: &'a mut HashCache, hasher: &'a dyn ContentHasher) -> Self {
        SyncExecutor {
            cache,
            hasher,
            progress: None,
            stop: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stop(mut self, stop: &'a StopFlag) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Execute `plan`.
    ///
    /// A stop request is honored between items; the returned report is then
    /// flagged `cancelled` and covers only what was processed.
    ///
    /// # Errors
    /// `DeletionNotConfirmed` if `delete_orphaned` is set, there are orphans,
    /// and `confirm` refuses. Nothing is copied or deleted in that case.
    pub fn execute(
        mut self,
        plan: SyncPlan,
        delete_orphaned: bool,
        confirm: &dyn ConfirmDeletion,
    ) -> Result<SyncReport, EngineError> {
        let delete = delete_orphaned && !plan.orphaned.is_empty();
        if delete {
            let summary = plan.deletion_summary();
            if !confirm.confirm(&summary) {
                info!("Deletion of {} orphaned files was not confirmed", summary.count);
                return Err(EngineError::DeletionNotConfirmed { count: summary.count });
            }
            info!(
                "Deleting {} orphaned files ({}) confirmed",
                summary.count,
                format_bytes(summary.total_bytes)
            );
        }

        let started_at = Utc::now();
        let timer = Instant::now();
        let files_to_delete = if delete { plan.orphaned.len() } else { 0 };
        let total = plan.to_copy.len() + files_to_delete;

        info!(
            "Starting sync {}: {} files to copy ({}), {} to delete",
            plan.id,
            plan.to_copy.len(),
            format_bytes(plan.total_copy_bytes),
            files_to_delete
        );
        emit(self.progress, || SyncEvent::ExecutionStarted {
            files_to_copy: plan.to_copy.len(),
            bytes_to_copy: plan.total_copy_bytes,
            files_to_delete,
        });

        let mut report = SyncReport {
            plan_id: plan.id,
            started_at,
            finished_at: started_at,
            files_copied: 0,
            bytes_copied: 0,
            copy_failures: 0,
            files_deleted: 0,
            delete_failures: 0,
            hash_failures: 0,
            empty_dirs_removed: 0,
            elapsed_secs: 0.0,
            cancelled: false,
            cache_saved: false,
            items: Vec::with_capacity(total),
        };
        let mut index = 0;

        for record in &plan.to_copy {
            if stop_requested(self.stop) {
                report.cancelled = true;
                break;
            }
            index += 1;

            let target = plan.destination_for(record);
            let mut hash_failures = Vec::new();
            let result = match fs_ops::copy_file_with_metadata(&record.absolute_path, &target) {
                Ok(bytes) => {
                    debug!("Copied {} ({} bytes)", record.relative_path.display(), bytes);
                    report.files_copied += 1;
                    report.bytes_copied += bytes;
                    if plan.verify_hashes {
                        hash_failures = self.refresh_hashes(&record.absolute_path, &target);
                    }
                    ItemResult::success(ItemAction::Copy, &record.relative_path, bytes)
                }
                Err(e) => {
                    warn!("Error copying {}: {}", record.relative_path.display(), e.detailed());
                    report.copy_failures += 1;
                    ItemResult::failed(ItemAction::Copy, &record.relative_path, &e)
                }
            };

            emit(self.progress, || SyncEvent::ItemCompleted {
                index,
                total,
                result: result.clone(),
            });
            report.items.push(result);

            for failure in hash_failures {
                report.hash_failures += 1;
                emit(self.progress, || SyncEvent::ItemFailed {
                    result: failure.clone(),
                });
                report.items.push(failure);
            }
        }

        if delete && !report.cancelled {
            let mut deleted = Vec::new();
            for record in &plan.orphaned {
                if stop_requested(self.stop) {
                    report.cancelled = true;
                    break;
                }
                index += 1;

                let result = match fs_ops::delete_file(&record.absolute_path) {
                    Ok(()) => {
                        debug!("Deleted orphaned file {}", record.relative_path.display());
                        report.files_deleted += 1;
                        self.cache.remove(&record.absolute_path);
                        deleted.push(record.absolute_path.clone());
                        ItemResult::success(ItemAction::Delete, &record.relative_path, record.size)
                    }
                    Err(e) => {
                        warn!("Error deleting {}: {}", record.relative_path.display(), e.detailed());
                        report.delete_failures += 1;
                        ItemResult::failed(ItemAction::Delete, &record.relative_path, &e)
                    }
                };

                emit(self.progress, || SyncEvent::ItemCompleted {
                    index,
                    total,
                    result: result.clone(),
                });
                report.items.push(result);
            }

            if !report.cancelled {
                report.empty_dirs_removed =
                    fs_ops::prune_emptied_dirs(&plan.destination_root, &deleted);
                if report.empty_dirs_removed > 0 {
                    info!("Removed {} empty directories", report.empty_dirs_removed);
                }
                emit(self.progress, || SyncEvent::DirectoriesPruned {
                    count: report.empty_dirs_removed,
                });
            }
        }

        report.cache_saved = self.cache.flush();
        report.finished_at = Utc::now();
        report.elapsed_secs = timer.elapsed().as_secs_f64();

        if report.cancelled {
            info!("Sync {} cancelled after {} of {} items", plan.id, index, total);
        }
        info!(
            "Sync complete: {} files copied ({}), {} copy errors, {} hash errors, {} files deleted, {} delete errors, {:.1}s",
            report.files_copied,
            format_bytes(report.bytes_copied),
            report.copy_failures,
            report.hash_failures,
            report.files_deleted,
            report.delete_failures,
            report.elapsed_secs
        );
        emit(self.progress, || SyncEvent::ExecutionCompleted {
            files_copied: report.files_copied,
            bytes_copied: report.bytes_copied,
            failures: report.copy_failures + report.hash_failures + report.delete_failures,
            cancelled: report.cancelled,
        });

        Ok(report)
    }

    /// After a copy: cache the source hash if missing, rehash the destination.
    ///
    /// Returns a `Hash` failure for each file that could not be read.
    fn refresh_hashes(&mut self, source: &Path, target: &Path) -> Vec<ItemResult> {
        let mut paths = Vec::with_capacity(2);
        if self.cache.get(source).is_none() {
            paths.push(source);
        }
        paths.push(target);

        let mut failures = Vec::new();
        for path in paths {
            match self.hasher.hash_file(path) {
                Ok(hash) => self.cache.update(path, hash),
                Err(e) => {
                    warn!("Error hashing {}: {}", path.display(), e.detailed());
                    failures.push(ItemResult::failed(ItemAction::Hash, path, &e));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{ChecksumAlgorithm, FileHasher};
    use crate::diff::{DiffEngine, DiffOptions};
    use crate::model::ItemOutcome;
    use crate::scanner::{ScanOptions, Scanner};
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    const MTIME: i64 = 1_650_000_000;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create dirs");
        fs::write(&path, content).expect("Failed to write file");
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(MTIME, 0))
            .expect("Failed to set mtime");
    }

    fn plan_for(src: &TempDir, dst: &TempDir, cache: &mut HashCache, verify_hashes: bool) -> SyncPlan {
        let scanner = Scanner::new(ScanOptions::default());
        let source = scanner.scan(src.path()).expect("scan source");
        let destination = scanner.scan(dst.path()).expect("scan destination");
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);
        let options = DiffOptions {
            verify_hashes,
            cloud_aware: false,
        };
        DiffEngine::new(cache, &hasher)
            .diff(&source, &destination, &options)
            .expect("diff")
    }

    /// Fails every read, as if the files were locked after the copy.
    struct UnreadableHasher;

    impl ContentHasher for UnreadableHasher {
        fn algorithm(&self) -> ChecksumAlgorithm {
            ChecksumAlgorithm::Md5
        }

        fn hash_file(&self, path: &Path) -> Result<String, EngineError> {
            Err(EngineError::ReadError {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
            })
        }
    }

    fn dirs() -> (TempDir, TempDir) {
        (
            tempfile::tempdir().expect("Failed to create temp dir"),
            tempfile::tempdir().expect("Failed to create temp dir"),
        )
    }

    #[test]
    fn test_copies_and_preserves_mtime() {
        let (src, dst) = dirs();
        write(src.path(), "Album/track.mp3", b"0123456789");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, true);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        let report = SyncExecutor::new(&mut cache, &hasher)
            .execute(plan, false, &AutoConfirm)
            .expect("execute");

        assert_eq!(report.files_copied, 1);
        assert_eq!(report.bytes_copied, 10);
        assert!(!report.has_failures());
        assert!(report.cache_saved);

        let copied = dst.path().join("Album/track.mp3");
        let meta = fs::metadata(&copied).expect("copied file");
        assert_eq!(
            filetime::FileTime::from_last_modification_time(&meta).unix_seconds(),
            MTIME
        );
        assert!(cache.get(&copied).is_some());
        assert_eq!(cache.get(&copied), cache.get(&src.path().join("Album/track.mp3")));
    }

    #[test]
    fn test_no_hash_refresh_without_verification() {
        let (src, dst) = dirs();
        write(src.path(), "a.txt", b"abc");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, false);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        SyncExecutor::new(&mut cache, &hasher)
            .execute(plan, false, &AutoConfirm)
            .expect("execute");

        assert!(cache.is_empty());
    }

    #[test]
    fn test_copy_failure_is_recorded_and_run_continues() {
        let (src, dst) = dirs();
        write(src.path(), "a.txt", b"a");
        write(src.path(), "b.txt", b"b");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, false);
        fs::remove_file(src.path().join("a.txt")).expect("remove");
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        let report = SyncExecutor::new(&mut cache, &hasher)
            .execute(plan, false, &AutoConfirm)
            .expect("execute");

        assert_eq!(report.copy_failures, 1);
        assert_eq!(report.files_copied, 1);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].path, Path::new("a.txt"));
        assert!(matches!(failed[0].outcome, ItemOutcome::Failed { .. }));
        assert!(dst.path().join("b.txt").exists());
    }

    #[test]
    fn test_refused_confirmation_changes_nothing() {
        let (src, dst) = dirs();
        write(src.path(), "new.txt", b"n");
        write(dst.path(), "old.txt", b"o");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, false);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        let asked = Cell::new(0);
        let deny = |summary: &DeletionSummary| {
            asked.set(summary.count);
            false
        };
        let result = SyncExecutor::new(&mut cache, &hasher).execute(plan, true, &deny);

        assert!(matches!(result, Err(EngineError::DeletionNotConfirmed { count: 1 })));
        assert_eq!(asked.get(), 1);
        assert!(dst.path().join("old.txt").exists());
        assert!(!dst.path().join("new.txt").exists());
    }

    #[test]
    fn test_deletes_orphans_cache_entries_and_empty_dirs() {
        let (src, dst) = dirs();
        write(src.path(), "keep.txt", b"k");
        write(dst.path(), "keep.txt", b"k");
        write(dst.path(), "Old/Deep/gone.txt", b"gone");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let orphan = dst.path().join("Old/Deep/gone.txt");
        cache.update(&orphan, "cafe");
        let plan = plan_for(&src, &dst, &mut cache, false);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        let report = SyncExecutor::new(&mut cache, &hasher)
            .execute(plan, true, &AutoConfirm)
            .expect("execute");

        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.empty_dirs_removed, 2);
        assert!(!orphan.exists());
        assert!(!dst.path().join("Old").exists());
        assert!(dst.path().join("keep.txt").exists());
        assert!(cache.get(&orphan).is_none());
    }

    #[test]
    fn test_unrelated_empty_dirs_survive_orphan_deletion() {
        let (src, dst) = dirs();
        write(dst.path(), "orphan.txt", b"o");
        fs::create_dir_all(dst.path().join(".git/refs/tags")).expect("Failed to create dirs");
        fs::create_dir_all(dst.path().join("Projects/EmptyOnPurpose")).expect("Failed to create dirs");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, false);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        let report = SyncExecutor::new(&mut cache, &hasher)
            .execute(plan, true, &AutoConfirm)
            .expect("execute");

        assert_eq!(report.files_deleted, 1);
        assert_eq!(report.empty_dirs_removed, 0);
        assert!(!dst.path().join("orphan.txt").exists());
        assert!(dst.path().join(".git/refs/tags").is_dir());
        assert!(dst.path().join("Projects/EmptyOnPurpose").is_dir());
    }

    #[test]
    fn test_hash_refresh_failure_is_reported() {
        let (src, dst) = dirs();
        write(src.path(), "a.txt", b"abc");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, true);
        let source_path = src.path().join("a.txt");
        cache.update(&source_path, "cached");

        let report = SyncExecutor::new(&mut cache, &UnreadableHasher)
            .execute(plan, false, &AutoConfirm)
            .expect("execute");

        assert_eq!(report.files_copied, 1);
        assert_eq!(report.hash_failures, 1);
        assert!(report.has_failures());
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].action, ItemAction::Hash);
        assert_eq!(failed[0].path, dst.path().join("a.txt"));
        assert!(dst.path().join("a.txt").exists());
        assert!(cache.get(&dst.path().join("a.txt")).is_none());
    }

    #[test]
    fn test_orphans_untouched_without_delete() {
        let (src, dst) = dirs();
        write(dst.path(), "B.txt", b"b");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, false);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);

        let never = |_: &DeletionSummary| -> bool { panic!("confirmation must not be requested") };
        let report = SyncExecutor::new(&mut cache, &hasher)
            .execute(plan, false, &never)
            .expect("execute");

        assert_eq!(report.files_deleted, 0);
        assert!(dst.path().join("B.txt").exists());
    }

    #[test]
    fn test_stop_before_first_item_cancels() {
        let (src, dst) = dirs();
        write(src.path(), "a.txt", b"a");
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let plan = plan_for(&src, &dst, &mut cache, false);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);
        let stop = StopFlag::new();
        stop.request_stop();

        let report = SyncExecutor::new(&mut cache, &hasher)
            .with_stop(&stop)
            .execute(plan, false, &AutoConfirm)
            .expect("execute");

        assert!(report.cancelled);
        assert_eq!(report.files_copied, 0);
        assert!(!dst.path().join("a.txt").exists());
    }
}
