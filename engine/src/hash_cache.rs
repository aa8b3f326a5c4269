//! Persistent content-hash cache.
//!
//! Maps normalized absolute paths to hex content hashes so unchanged files are
//! not re-read on every run. The cache is loaded fully into memory, mutated by
//! the diff and execute stages, and rewritten wholesale on each save.
//!
//! A file-backed cache holds a sibling `<file>.lock` for as long as it is
//! open; the file itself is last-writer-wins with no merge, so only one run
//! may own it at a time.

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    algorithm: ChecksumAlgorithm,
    hashes: BTreeMap<String, String>,
}

/// On-disk shapes accepted by `load`. The flat map is the older format and
/// always holds MD5 hashes.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCache {
    Document(CacheDocument),
    Flat(BTreeMap<String, String>),
}

/// Exclusive ownership marker for a cache file.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    /// Create `<cache>.lock`, failing if another owner already holds it.
    pub fn acquire(cache_path: &Path) -> Result<Self, EngineError> {
        let mut lock_name = cache_path.as_os_str().to_owned();
        lock_name.push(".lock");
        let path = PathBuf::from(lock_name);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| EngineError::CachePersist {
                    path: cache_path.to_path_buf(),
                    message: e.to_string(),
                })?;
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(CacheLock { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(EngineError::CacheLocked {
                path: cache_path.to_path_buf(),
            }),
            Err(e) => Err(EngineError::CachePersist {
                path: cache_path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Path-to-hash map with best-effort durability.
#[derive(Debug)]
pub struct HashCache {
    path: Option<PathBuf>,
    algorithm: ChecksumAlgorithm,
    hashes: BTreeMap<String, String>,
    dirty: bool,
    _lock: Option<CacheLock>,
}

impl HashCache {
    /// A cache that never touches disk.
    pub fn in_memory(algorithm: ChecksumAlgorithm) -> Self {
        HashCache {
            path: None,
            algorithm,
            hashes: BTreeMap::new(),
            dirty: false,
            _lock: None,
        }
    }

    /// Lock and load the cache file at `path`.
    ///
    /// A missing file yields an empty cache. A corrupt file is logged and
    /// replaced by an empty cache on the next save. A file written with a
    /// different algorithm is discarded so hashes are never compared across
    /// algorithms.
    pub fn open(path: impl Into<PathBuf>, algorithm: ChecksumAlgorithm) -> Result<Self, EngineError> {
        let path = path.into();
        let lock = CacheLock::acquire(&path)?;

        let hashes = match Self::load(&path, algorithm) {
            Ok(hashes) => hashes,
            Err(e) => {
                error!("{}", e);
                BTreeMap::new()
            }
        };
        info!("Loaded {} cached hashes from {}", hashes.len(), path.display());

        Ok(HashCache {
            path: Some(path),
            algorithm,
            hashes,
            dirty: false,
            _lock: Some(lock),
        })
    }

    fn load(path: &Path, algorithm: ChecksumAlgorithm) -> Result<BTreeMap<String, String>, EngineError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(EngineError::CacheLoad {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };

        let stored: StoredCache = serde_json::from_str(&data).map_err(|e| EngineError::CacheLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let (stored_algorithm, hashes) = match stored {
            StoredCache::Document(doc) => (doc.algorithm, doc.hashes),
            StoredCache::Flat(hashes) => (ChecksumAlgorithm::Md5, hashes),
        };

        if stored_algorithm != algorithm {
            warn!(
                "Hash cache {} uses {}, expected {}; starting empty",
                path.display(),
                stored_algorithm,
                algorithm
            );
            return Ok(BTreeMap::new());
        }

        Ok(hashes
            .into_iter()
            .map(|(k, v)| (normalize_key_str(&k), v))
            .collect())
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// True if entries changed since the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.hashes.get(&normalize_key(path)).map(String::as_str)
    }

    pub fn update(&mut self, path: &Path, hash: impl Into<String>) {
        let hash = hash.into();
        let key = normalize_key(path);
        if self.hashes.get(&key) != Some(&hash) {
            debug!("Caching hash for {}", path.display());
            self.hashes.insert(key, hash);
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, path: &Path) -> Option<String> {
        let removed = self.hashes.remove(&normalize_key(path));
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Drop entries whose paths are not in `existing`. Returns the number removed.
    pub fn prune_missing<'a, I>(&mut self, existing: I) -> usize
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let keep: HashSet<String> = existing.into_iter().map(normalize_key).collect();
        let before = self.hashes.len();
        self.hashes.retain(|k, _| keep.contains(k));
        let removed = before - self.hashes.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    /// Rewrite the cache file. In-memory caches succeed without I/O.
    ///
    /// The document is written to a temporary sibling and renamed over the
    /// old file. On failure the in-memory entries are kept.
    pub fn save(&mut self) -> Result<(), EngineError> {
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };

        let persist_err = |message: String| EngineError::CachePersist {
            path: path.clone(),
            message,
        };

        let doc = CacheDocument {
            version: FORMAT_VERSION,
            algorithm: self.algorithm,
            hashes: self.hashes.clone(),
        };
        let json = serde_json::to_string_pretty(&doc).map_err(|e| persist_err(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| persist_err(e.to_string()))?;
            }
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, json).map_err(|e| persist_err(e.to_string()))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            persist_err(e.to_string())
        })?;

        self.dirty = false;
        debug!("Saved {} hashes to {}", self.hashes.len(), path.display());
        Ok(())
    }

    /// Save if dirty; failures are logged, not returned.
    pub fn flush(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        match self.save() {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }
}

impl Drop for HashCache {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Normalize a path into a cache key: `.` and `..` resolved lexically,
/// separators as `/`, lowercased.
pub fn normalize_key(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().to_lowercase(),
            Component::RootDir => prefix.push('/'),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() && !prefix.ends_with('/') {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().to_lowercase()),
        }
    }

    format!("{}{}", prefix, parts.join("/"))
}

fn normalize_key_str(key: &str) -> String {
    normalize_key(Path::new(&key.replace('\\', "/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(Path::new("/Music/./Artist/../Track.MP3")), "/music/track.mp3");
        assert_eq!(normalize_key(Path::new("rel/A.txt")), "rel/a.txt");
        assert_eq!(normalize_key_str("C:\\Music\\A.mp3"), normalize_key_str("c:/music/a.mp3"));
    }

    #[test]
    fn test_update_get_remove() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        let path = Path::new("/tmp/Some/File.txt");

        assert!(cache.get(path).is_none());
        cache.update(path, "abc");
        assert!(cache.is_dirty());
        assert_eq!(cache.get(Path::new("/tmp/some/file.txt")), Some("abc"));

        assert_eq!(cache.remove(path), Some("abc".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_update_same_value_keeps_clean() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        cache.update(Path::new("/a"), "x");
        cache.save().expect("in-memory save");
        cache.update(Path::new("/a"), "x");
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cache_path = temp_dir.path().join("hashes.json");
        let file = temp_dir.path().join("Track.flac");

        {
            let mut cache = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("open");
            cache.update(&file, "d41d8cd98f00b204e9800998ecf8427e");
            cache.save().expect("save");
        }

        let cache = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("reopen");
        assert_eq!(cache.get(&file), Some("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn test_drop_flushes_dirty_cache() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cache_path = temp_dir.path().join("hashes.json");

        {
            let mut cache = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("open");
            cache.update(Path::new("/x/y"), "1234");
        }

        let cache = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("reopen");
        assert_eq!(cache.get(Path::new("/x/y")), Some("1234"));
    }

    #[test]
    fn test_second_open_is_locked() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cache_path = temp_dir.path().join("hashes.json");

        let first = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("open");
        let second = HashCache::open(&cache_path, ChecksumAlgorithm::Md5);
        assert!(matches!(second, Err(EngineError::CacheLocked { .. })));

        drop(first);
        assert!(HashCache::open(&cache_path, ChecksumAlgorithm::Md5).is_ok());
    }

    #[test]
    fn test_loads_flat_legacy_format() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cache_path = temp_dir.path().join("hashes.json");
        fs::write(&cache_path, r#"{ "/music/a.mp3": "abc" }"#).expect("write");

        let cache = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("open");
        assert_eq!(cache.get(Path::new("/Music/A.mp3")), Some("abc"));
        drop(cache);

        let other = HashCache::open(&cache_path, ChecksumAlgorithm::Blake3).expect("open");
        assert!(other.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let cache_path = temp_dir.path().join("hashes.json");
        fs::write(&cache_path, "not json").expect("write");

        let cache = HashCache::open(&cache_path, ChecksumAlgorithm::Md5).expect("open");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_prune_missing() {
        let mut cache = HashCache::in_memory(ChecksumAlgorithm::Md5);
        cache.update(Path::new("/a"), "1");
        cache.update(Path::new("/b"), "2");
        cache.update(Path::new("/c"), "3");

        let removed = cache.prune_missing([Path::new("/A"), Path::new("/c")]);
        assert_eq!(removed, 1);
        assert!(cache.get(Path::new("/b")).is_none());
        assert_eq!(cache.len(), 2);
    }
}
