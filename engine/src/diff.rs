//! Differential comparison of two inventories.
//!
//! Every source file is matched against the destination by case-insensitive
//! relative path and routed to `to_copy` or `to_skip`; destination files with
//! no source counterpart become `orphaned`. Size and modification time decide
//! first, content hashes second.

use crate::checksums::ContentHasher;
use crate::error::EngineError;
use crate::hash_cache::HashCache;
use crate::model::{FileRecord, Inventory, ItemAction, ItemResult, SyncPlan};
use crate::progress::{emit, stop_requested, ProgressCallback, StopFlag, SyncEvent};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Modification times further apart than this count as a change.
pub const MTIME_TOLERANCE_SECS: f64 = 2.0;

/// Skip reason recorded for files left alone because the destination copy
/// is remote-only.
pub const REMOTE_ONLY_REASON: &str = "remote-only at destination";

/// Comparison switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Compare content hashes when size and time agree
    pub verify_hashes: bool,

    /// Treat remote-only destination files as already synced
    pub cloud_aware: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            verify_hashes: true,
            cloud_aware: true,
        }
    }
}

/// True if size differs or the modification times are more than
/// `MTIME_TOLERANCE_SECS` apart.
pub fn metadata_differs(source: &FileRecord, destination: &FileRecord) -> bool {
    source.size != destination.size
        || (source.modified_secs() - destination.modified_secs()).abs() > MTIME_TOLERANCE_SECS
}

/// Builds a `SyncPlan`, reading and filling the hash cache as it goes.
pub struct DiffEngine<'a> {
    cache: &'a mut HashCache,
    hasher: &'a dyn ContentHasher,
    progress: Option<&'a dyn ProgressCallback>,
    stop: Option<&'a StopFlag>,
    hashes_computed: usize,
    diagnostics: Vec<ItemResult>,
}

impl<'a> DiffEngine<'a> {
    pub fn new(cache: &'a mut HashCache, hasher: &'a dyn ContentHasher) -> Self {
        DiffEngine {
            cache,
            hasher,
            progress: None,
            stop: None,
            hashes_computed: 0,
            diagnostics: Vec::new(),
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

    /// Classify `source` against `destination`.
    ///
    /// Scan failures from both inventories are carried into the plan's
    /// diagnostics alongside any hash failures and remote-only skips.
    ///
    /// # Errors
    /// Only `Cancelled`; per-file problems never abort the diff.
    pub fn diff(
        mut self,
        source: &Inventory,
        destination: &Inventory,
        options: &DiffOptions,
    ) -> Result<SyncPlan, EngineError> {
        info!(
            "Comparing {} source files against {} destination files",
            source.files.len(),
            destination.files.len()
        );
        emit(self.progress, || SyncEvent::DiffStarted {
            source_files: source.files.len(),
            destination_files: destination.files.len(),
        });

        let dest_index: HashMap<String, &FileRecord> = destination
            .files
            .iter()
            .map(|f| (f.match_key(), f))
            .collect();
        let mut matched: HashSet<String> = HashSet::new();

        let mut to_copy = Vec::new();
        let mut to_skip = Vec::new();
        let mut total_copy_bytes = 0u64;

        for src in &source.files {
            if stop_requested(self.stop) {
                info!("Comparison cancelled");
                return Err(EngineError::Cancelled);
            }

            let key = src.match_key();
            let needs_copy = match dest_index.get(&key) {
                None => {
                    debug!("New file: {}", src.relative_path.display());
                    true
                }
                Some(dst) => {
                    matched.insert(key);
                    self.needs_update(src, dst, options)
                }
            };

            if needs_copy {
                total_copy_bytes += src.size;
                to_copy.push(src.clone());
            } else {
                to_skip.push(src.clone());
            }
        }

        let orphaned: Vec<FileRecord> = destination
            .files
            .iter()
            .filter(|f| !matched.contains(&f.match_key()))
            .cloned()
            .collect();

        let mut diagnostics: Vec<ItemResult> = source
            .failures
            .iter()
            .chain(destination.failures.iter())
            .cloned()
            .collect();
        diagnostics.append(&mut self.diagnostics);

        info!(
            "Analysis complete: {} to copy ({} bytes), {} unchanged, {} orphaned, {} hashes computed",
            to_copy.len(),
            total_copy_bytes,
            to_skip.len(),
            orphaned.len(),
            self.hashes_computed
        );
        emit(self.progress, || SyncEvent::DiffCompleted {
            to_copy: to_copy.len(),
            to_skip: to_skip.len(),
            orphaned: orphaned.len(),
            total_copy_bytes,
        });

        Ok(SyncPlan {
            id: Uuid::new_v4(),
            source_root: source.root.clone(),
            destination_root: destination.root.clone(),
            created_at: Utc::now(),
            verify_hashes: options.verify_hashes,
            to_copy,
            to_skip,
            orphaned,
            total_copy_bytes,
            hashes_computed: self.hashes_computed,
            diagnostics,
        })
    }

    fn needs_update(&mut self, src: &FileRecord, dst: &FileRecord, options: &DiffOptions) -> bool {
        if options.cloud_aware && dst.is_remote_placeholder {
            debug!("Remote-only at destination, skipping: {}", src.relative_path.display());
            self.diagnostics.push(ItemResult::skipped(
                ItemAction::Copy,
                &src.relative_path,
                REMOTE_ONLY_REASON,
            ));
            return false;
        }

        if metadata_differs(src, dst) {
            debug!("Size or time changed: {}", src.relative_path.display());
            return true;
        }

        if !options.verify_hashes {
            return false;
        }

        let cached_src = self.cache.get(&src.absolute_path).map(str::to_owned);
        let cached_dst = self.cache.get(&dst.absolute_path).map(str::to_owned);
        if let (Some(a), Some(b)) = (&cached_src, &cached_dst) {
            return a != b;
        }

        if dst.is_remote_placeholder {
            // only the source may be read; copy rather than download
            if cached_src.is_none() {
                self.compute_and_cache(&src.absolute_path);
            }
            return true;
        }

        let src_hash = match cached_src {
            Some(hash) => Some(hash),
            None => self.compute_and_cache(&src.absolute_path),
        };
        let dst_hash = match cached_dst {
            Some(hash) => Some(hash),
            None => self.compute_and_cache(&dst.absolute_path),
        };

        match (src_hash, dst_hash) {
            (Some(a), Some(b)) => {
                if a != b {
                    debug!("Content differs: {}", src.relative_path.display());
                }
                a != b
            }
            _ => true,
        }
    }

    /// Hash a file and cache the result. `None` if the file cannot be read;
    /// the failure is recorded in the plan diagnostics.
    fn compute_and_cache(&mut self, path: &Path) -> Option<String> {
        emit(self.progress, || SyncEvent::Hashing {
            path: path.to_path_buf(),
        });
        self.hashes_computed += 1;

        match self.hasher.hash_file(path) {
            Ok(hash) => {
                self.cache.update(path, hash.clone());
                Some(hash)
            }
            Err(e) => {
                warn!("Error hashing {}: {}", path.display(), e.detailed());
                let result = ItemResult::failed(ItemAction::Hash, path, &e);
                emit(self.progress, || SyncEvent::ItemFailed {
                    result: result.clone(),
                });
                self.diagnostics.push(result);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{ChecksumAlgorithm, FileHasher};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::time::{Duration, UNIX_EPOCH};

    const T: u64 = 1_700_000_000;

    fn record(root: &str, rel: &str, size: u64, mtime: f64) -> FileRecord {
        FileRecord {
            absolute_path: PathBuf::from(root).join(rel),
            relative_path: PathBuf::from(rel),
            size,
            modified: UNIX_EPOCH + Duration::from_secs_f64(mtime),
            is_remote_placeholder: false,
        }
    }

    fn inventory(root: &str, files: Vec<FileRecord>) -> Inventory {
        Inventory {
            root: PathBuf::from(root),
            files,
            ..Inventory::default()
        }
    }

    fn names(records: &[FileRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.relative_path.to_string_lossy().to_string())
            .collect()
    }

    /// Hands out fixed hashes per file name and records what it was asked to read.
    struct FakeHasher {
        hashes: HashMap<String, String>,
        reads: RefCell<Vec<PathBuf>>,
    }

    impl FakeHasher {
        fn new(pairs: &[(&str, &str)]) -> Self {
            FakeHasher {
                hashes: pairs.iter().map(|(p, h)| (p.to_string(), h.to_string())).collect(),
                reads: RefCell::new(Vec::new()),
            }
        }
    }

    impl ContentHasher for FakeHasher {
        fn algorithm(&self) -> ChecksumAlgorithm {
            ChecksumAlgorithm::Md5
        }

        fn hash_file(&self, path: &Path) -> Result<String, EngineError> {
            self.reads.borrow_mut().push(path.to_path_buf());
            self.hashes
                .get(&path.to_string_lossy().to_string())
                .cloned()
                .ok_or_else(|| EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                })
        }
    }

    fn run(
        cache: &mut HashCache,
        hasher: &dyn ContentHasher,
        source: &Inventory,
        destination: &Inventory,
        options: DiffOptions,
    ) -> SyncPlan {
        DiffEngine::new(cache, hasher)
            .diff(source, destination, &options)
            .expect("diff failed")
    }

    #[test]
    fn test_new_file_goes_to_copy() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let destination = inventory("/dst", vec![]);

        let plan = run(&mut cache, &hasher, &source, &destination, DiffOptions::default());

        assert_eq!(names(&plan.to_copy), vec!["A.txt"]);
        assert!(plan.to_skip.is_empty());
        assert!(plan.orphaned.is_empty());
        assert_eq!(plan.total_copy_bytes, 100);
    }

    #[test]
    fn test_equal_metadata_skips_without_hashing() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let destination = inventory(
            "/dst",
            vec![
                record("/dst", "a.TXT", 100, T as f64 + 1.5),
                record("/dst", "B.txt", 5, T as f64),
            ],
        );
        let options = DiffOptions {
            verify_hashes: false,
            cloud_aware: true,
        };

        let plan = run(&mut cache, &hasher, &source, &destination, options);

        assert_eq!(names(&plan.to_skip), vec!["A.txt"]);
        assert_eq!(names(&plan.orphaned), vec!["B.txt"]);
        assert!(plan.to_copy.is_empty());
        assert!(hasher.reads.borrow().is_empty());
    }

    #[test]
    fn test_mtime_tolerance_is_strict() {
        let src = record("/src", "a", 1, T as f64);
        assert!(!metadata_differs(&src, &record("/dst", "a", 1, T as f64 + 2.0)));
        assert!(metadata_differs(&src, &record("/dst", "a", 1, T as f64 + 2.5)));
        assert!(metadata_differs(&src, &record("/dst", "a", 2, T as f64)));
    }

    #[test]
    fn test_content_mismatch_with_equal_metadata_copies() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[("/src/A.txt", "aaaa"), ("/dst/A.txt", "bbbb")]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let destination = inventory("/dst", vec![record("/dst", "A.txt", 100, T as f64)]);

        let plan = run(&mut cache, &hasher, &source, &destination, DiffOptions::default());

        assert_eq!(names(&plan.to_copy), vec!["A.txt"]);
        assert_eq!(plan.hashes_computed, 2);
        assert_eq!(cache.get(Path::new("/src/A.txt")), Some("aaaa"));
        assert_eq!(cache.get(Path::new("/dst/A.txt")), Some("bbbb"));
    }

    #[test]
    fn test_cached_hashes_are_trusted() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        cache.update(Path::new("/src/A.txt"), "same");
        cache.update(Path::new("/dst/A.txt"), "same");
        let hasher = FakeHasher::new(&[]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let destination = inventory("/dst", vec![record("/dst", "A.txt", 100, T as f64)]);

        let plan = run(&mut cache, &hasher, &source, &destination, DiffOptions::default());

        assert_eq!(names(&plan.to_skip), vec!["A.txt"]);
        assert!(hasher.reads.borrow().is_empty());
    }

    #[test]
    fn test_remote_only_destination_never_hashed_when_cloud_aware() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[("/src/A.txt", "aaaa"), ("/dst/A.txt", "bbbb")]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let mut remote = record("/dst", "A.txt", 100, T as f64);
        remote.is_remote_placeholder = true;
        let destination = inventory("/dst", vec![remote]);

        let plan = run(&mut cache, &hasher, &source, &destination, DiffOptions::default());

        assert_eq!(names(&plan.to_skip), vec!["A.txt"]);
        assert!(!hasher.reads.borrow().contains(&PathBuf::from("/dst/A.txt")));
        assert_eq!(
            plan.diagnostics,
            vec![ItemResult::skipped(ItemAction::Copy, "A.txt", REMOTE_ONLY_REASON)]
        );
        assert_eq!(plan.failures().count(), 0);
    }

    #[test]
    fn test_remote_only_destination_without_cloud_awareness_forces_copy() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[("/src/A.txt", "aaaa")]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let mut remote = record("/dst", "A.txt", 100, T as f64);
        remote.is_remote_placeholder = true;
        let destination = inventory("/dst", vec![remote]);
        let options = DiffOptions {
            verify_hashes: true,
            cloud_aware: false,
        };

        let plan = run(&mut cache, &hasher, &source, &destination, options);

        assert_eq!(names(&plan.to_copy), vec!["A.txt"]);
        assert_eq!(*hasher.reads.borrow(), vec![PathBuf::from("/src/A.txt")]);
        assert_eq!(cache.get(Path::new("/src/A.txt")), Some("aaaa"));
    }

    #[test]
    fn test_hash_failure_forces_copy_and_is_recorded() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[("/src/A.txt", "aaaa")]);
        let source = inventory("/src", vec![record("/src", "A.txt", 100, T as f64)]);
        let destination = inventory("/dst", vec![record("/dst", "A.txt", 100, T as f64)]);

        let plan = run(&mut cache, &hasher, &source, &destination, DiffOptions::default());

        assert_eq!(names(&plan.to_copy), vec!["A.txt"]);
        assert_eq!(plan.diagnostics.len(), 1);
        assert_eq!(plan.diagnostics[0].action, ItemAction::Hash);
        assert_eq!(plan.diagnostics[0].path, PathBuf::from("/dst/A.txt"));
    }

    #[test]
    fn test_real_files_with_equal_content_skip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src.bin");
        let dst = temp_dir.path().join("dst.bin");
        std::fs::write(&src, b"same bytes").expect("Failed to write file");
        std::fs::write(&dst, b"same bytes").expect("Failed to write file");

        let mut a = record("/", "x.bin", 10, T as f64);
        a.absolute_path = src;
        let mut b = record("/", "x.bin", 10, T as f64);
        b.absolute_path = dst;

        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);
        let plan = run(
            &mut cache,
            &hasher,
            &inventory("/src", vec![a]),
            &inventory("/dst", vec![b]),
            DiffOptions::default(),
        );

        assert_eq!(plan.to_skip.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_diff_stops_when_requested() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let hasher = FakeHasher::new(&[]);
        let source = inventory("/src", vec![record("/src", "A.txt", 1, T as f64)]);
        let stop = StopFlag::new();
        stop.request_stop();

        let result = DiffEngine::new(&mut cache, &hasher)
            .with_stop(&stop)
            .diff(&source, &inventory("/dst", vec![]), &DiffOptions::default());
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
