//! Content hashing.
//!
//! This module provides:
//! - The supported checksum algorithms (MD5, SHA-256, BLAKE3)
//! - Streaming file-level checksum computation
//! - The `ContentHasher` seam used by the diff and execute stages

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5 (fast, compatible with existing caches)
    #[default]
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl ChecksumAlgorithm {
    /// Parse algorithm from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "sha256" => Some(Self::Sha256),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

/// Incremental hasher producing a lowercase hex digest
pub trait ChecksumHasher {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the hex digest
    fn finalize(self: Box<Self>) -> String;
}

struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> String {
        format!("{:x}", self.context.compute())
    }
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> String {
        use sha2::Digest;
        format!("{:x}", self.hasher.finalize())
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Compute the hex checksum of a file, streaming it in 64 KB chunks.
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, EngineError> {
    let mut file = File::open(path).map_err(|e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = create_hasher(algorithm);
    let mut buffer = [0u8; 65536];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }

    Ok(hasher.finalize())
}

/// Computes content hashes for the diff and execute stages.
///
/// Reading a file's content is what materializes a cloud placeholder, so
/// every content read in the pipeline goes through this trait.
pub trait ContentHasher {
    fn algorithm(&self) -> ChecksumAlgorithm;

    fn hash_file(&self, path: &Path) -> Result<String, EngineError>;
}

/// Hashes files on the local filesystem.
#[derive(Debug, Clone, Copy)]
pub struct FileHasher {
    algorithm: ChecksumAlgorithm,
}

impl FileHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        FileHasher { algorithm }
    }
}

impl ContentHasher for FileHasher {
    fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    fn hash_file(&self, path: &Path) -> Result<String, EngineError> {
        compute_file_checksum(path, self.algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
        let mut hasher = create_hasher(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    #[test]
    fn test_algorithm_display() {
        assert_eq!(ChecksumAlgorithm::Md5.to_string(), "md5");
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(ChecksumAlgorithm::Blake3.to_string(), "blake3");
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!(ChecksumAlgorithm::from_str("MD5"), Some(ChecksumAlgorithm::Md5));
        assert_eq!(ChecksumAlgorithm::from_str("sha256"), Some(ChecksumAlgorithm::Sha256));
        assert_eq!(ChecksumAlgorithm::from_str("blake3"), Some(ChecksumAlgorithm::Blake3));
        assert_eq!(ChecksumAlgorithm::from_str("crc32"), None);
    }

    #[test]
    fn test_md5_hasher() {
        assert_eq!(
            digest(ChecksumAlgorithm::Md5, b"hello"),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn test_sha256_hasher() {
        assert_eq!(
            digest(ChecksumAlgorithm::Sha256, b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_blake3_hasher_matches_one_shot() {
        let expected = blake3::hash(b"hello").to_hex().to_string();
        assert_eq!(digest(ChecksumAlgorithm::Blake3, b"hello"), expected);
    }

    #[test]
    fn test_compute_file_checksum() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("a.txt");
        std::fs::write(&path, b"hello").expect("Failed to write file");

        let hex = compute_file_checksum(&path, ChecksumAlgorithm::Md5).expect("Failed to hash");
        assert_eq!(hex, "5d41402abc4b2a76b9719d911017c592");

        let hasher = FileHasher::new(ChecksumAlgorithm::Md5);
        assert_eq!(hasher.hash_file(&path).expect("Failed to hash"), hex);
    }

    #[test]
    fn test_compute_file_checksum_missing_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = compute_file_checksum(&temp_dir.path().join("nope"), ChecksumAlgorithm::Md5);
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
    }
}
