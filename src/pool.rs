//! Object pool for expensive entities.
//!
//! Construction of some entities (programs in particular) needs several
//! external process round trips. The pool caches them by type and
//! construction arguments. Pooling is opt-in per call, and the pool is only
//! written to disk when [`ObjectPool::save`] is called.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{IoContext, Result};
use crate::fsops;

/// Cache interface used by callers that opt into pooling.
pub trait ObjectCache<T> {
    /// Cached value for `key`.
    fn get(&self, key: &str) -> Option<T>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: String, value: T);

    /// Drops `key`.
    fn remove(&self, key: &str) -> Option<T>;
}

/// Builds a case-insensitive pool key from a type name and arguments.
#[must_use]
pub fn pool_key(type_name: &str, args: &[&str], kwargs: &[(&str, &str)]) -> String {
    let args = args.join(",").to_lowercase();
    let kwargs = kwargs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
        .to_lowercase();
    format!("{}|{}|{}", type_name, args, kwargs)
}

/// Mutex-guarded pool persisted as one JSON mapping.
#[derive(Debug)]
pub struct ObjectPool<T> {
    save_file: PathBuf,
    entries: Mutex<HashMap<String, T>>,
}

impl<T> ObjectPool<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Creates an empty pool backed by `save_file`.
    pub fn new(save_file: impl Into<PathBuf>) -> Self {
        Self {
            save_file: save_file.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File the pool is saved to.
    #[must_use]
    pub fn save_file(&self) -> &Path {
        &self.save_file
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cached value for `key`, or the result of `build`, which is then cached.
    ///
    /// The lock is not held while `build` runs.
    ///
    /// # Errors
    /// Returns `build`'s error; nothing is cached then.
    pub fn get_or_try_insert_with<F>(&self, key: &str, build: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.get(key) {
            tracing::debug!("Object pool hit: {}", key);
            return Ok(value);
        }
        let value = build()?;
        self.put(key.to_string(), value.clone());
        Ok(value)
    }

    /// Drops every entry in memory.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Writes the pool to its save file.
    ///
    /// # Errors
    /// Returns an I/O or JSON error.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.lock())?;
        if let Some(parent) = self.save_file.parent() {
            fsops::create_target_dir(parent)?;
        }
        fs::write(&self.save_file, json).at("Error writing", &self.save_file)?;
        tracing::debug!("Saved object pool to {}", self.save_file.display());
        Ok(())
    }

    /// Replaces the in-memory pool with the save file's contents.
    ///
    /// A missing file leaves the pool empty. Returns the entry count.
    ///
    /// # Errors
    /// Returns an I/O or JSON error.
    pub fn load(&self) -> Result<usize> {
        if !self.save_file.is_file() {
            self.clear();
            return Ok(0);
        }
        let text = fs::read_to_string(&self.save_file).at("Error reading", &self.save_file)?;
        let loaded: HashMap<String, T> = serde_json::from_str(&text)?;
        let count = loaded.len();
        *self.lock() = loaded;
        tracing::debug!("Loaded {} pooled objects", count);
        Ok(count)
    }

    /// Deletes the save file.
    ///
    /// # Errors
    /// Returns an I/O error.
    pub fn clear_save_file(&self) -> Result<()> {
        fsops::remove_target_path(&self.save_file)
    }
}

impl<T> ObjectCache<T> for ObjectPool<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    fn get(&self, key: &str) -> Option<T> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: String, value: T) {
        self.lock().insert(key, value);
    }

    fn remove(&self, key: &str) -> Option<T> {
        self.lock().remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_is_case_insensitive() {
        assert_eq!(
            pool_key("BlenderProgram", &["C:/Blender/Blender.exe"], &[]),
            pool_key("BlenderProgram", &["c:/blender/blender.exe"], &[])
        );
        assert_eq!(
            pool_key("BlenderVenv", &["/v"], &[("Delete", "True")]),
            "BlenderVenv|/v|delete=true"
        );
    }

    #[test]
    fn test_get_or_try_insert_with_builds_once() {
        let dir = tempfile::tempdir().unwrap();
        let pool: ObjectPool<String> = ObjectPool::new(dir.path().join("pool.json"));
        let mut calls = 0;
        let first = pool
            .get_or_try_insert_with("k", || {
                calls += 1;
                Ok("value".to_string())
            })
            .unwrap();
        let second = pool
            .get_or_try_insert_with("k", || {
                calls += 1;
                Ok("other".to_string())
            })
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let pool: ObjectPool<String> = ObjectPool::new(dir.path().join("pool.json"));
        let result = pool.get_or_try_insert_with("k", || {
            Err(crate::error::DepotError::Validation("no".into()))
        });
        assert!(result.is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_save_load_and_clear_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cache").join("pool.json");
        let pool: ObjectPool<u32> = ObjectPool::new(&file);
        pool.put("a".into(), 1);
        pool.put("b".into(), 2);
        pool.save().unwrap();

        let restored: ObjectPool<u32> = ObjectPool::new(&file);
        assert_eq!(restored.load().unwrap(), 2);
        assert_eq!(restored.get("b"), Some(2));
        assert_eq!(restored.remove("a"), Some(1));

        restored.clear_save_file().unwrap();
        assert!(!file.exists());
        assert_eq!(restored.load().unwrap(), 0);
    }
}
