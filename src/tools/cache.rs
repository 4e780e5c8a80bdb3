//! Per-file result cache.
//!
//! Entries are keyed by file path and tagged with a SHA-256 digest of the
//! buffer they were computed from. Looking a path up with a different
//! digest drops everything cached for that path, so a result is never
//! served for content other than the one it was computed on.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};

/// SHA-256 of a buffer.
pub type BufferDigest = [u8; 32];

/// Most values kept per file before the file's entry is reset.
const MAX_VALUES_PER_FILE: usize = 64;

/// Computes the digest of `buffer`.
pub fn digest(buffer: &str) -> BufferDigest {
    Sha256::digest(buffer.as_bytes()).into()
}

#[derive(Debug)]
struct FileEntry<K, V> {
    digest: BufferDigest,
    values: HashMap<K, V>,
}

/// Results cached per file, invalidated when the file's buffer changes.
#[derive(Debug)]
pub struct FileCache<K, V> {
    files: Mutex<HashMap<PathBuf, FileEntry<K, V>>>,
}

impl<K, V> Default for FileCache<K, V> {
    fn default() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> FileCache<K, V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value cached for `key` under `path`, if it was computed
    /// from a buffer with the same digest.
    pub fn get(&self, path: &Path, digest: &BufferDigest, key: &K) -> Option<V> {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = files.get(path)?;
        if &entry.digest != digest {
            files.remove(path);
            return None;
        }
        entry.values.get(key).cloned()
    }

    /// Stores `value` for `key` under `path`.
    pub fn insert(&self, path: &Path, digest: BufferDigest, key: K, value: V) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = files
            .entry(path.to_path_buf())
            .or_insert_with(|| FileEntry {
                digest,
                values: HashMap::new(),
            });
        if entry.digest != digest || entry.values.len() >= MAX_VALUES_PER_FILE {
            entry.digest = digest;
            entry.values.clear();
        }
        entry.values.insert(key, value);
    }

    /// Number of files with cached values.
    pub fn len(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
