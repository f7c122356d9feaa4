//! In-memory cache of parsed files keyed by path and modification time.
//!
//! An entry is reused only while the file's mtime matches the one seen
//! at load time; a changed file is reloaded on the next lookup.
//! [`FileCache::invalidate`] and [`FileCache::clear`] drop entries
//! explicitly.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

struct Entry<T> {
    modified: SystemTime,
    value: Arc<T>,
}

pub struct FileCache<T> {
    entries: HashMap<PathBuf, Entry<T>>,
}

impl<T> Default for FileCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> FileCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `path`, calling `load` when the file
    /// is not cached yet or its modification time changed.
    pub fn get_or_load<F>(&mut self, path: &Path, load: F) -> Result<Arc<T>>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        if let Some(entry) = self.entries.get(path) {
            if entry.modified == modified {
                debug!(path = %path.display(), "File cache hit");
                return Ok(entry.value.clone());
            }
        }

        debug!(path = %path.display(), "File cache miss");
        let value = Arc::new(load(path)?);
        self.entries.insert(
            path.to_path_buf(),
            Entry {
                modified,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    /// Drops the entry for `path`. Returns `true` if one was cached.
    pub fn invalidate(&mut self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
