//! Per-kind partition of the repository.
//!
//! Records are keyed by uuid in memory but written as
//! `<stable hash>.<extension>` files directly under the repository root. At
//! most one record exists per logical entity: `add` compares identities
//! before inserting.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::layout::StorageEntry;
use super::record;
use crate::component::{ComponentKind, Entity, StorageTarget};
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;
use crate::hashing;

/// Result of loading a sub-repository from disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records loaded into the pool.
    pub loaded: usize,
    /// Loaded records that failed verification.
    pub unverified: usize,
    /// Records that could not be decoded.
    pub failed: usize,
}

/// Pool and on-disk records of one component kind.
#[derive(Debug)]
pub struct SubRepository<T> {
    kind: ComponentKind,
    extension: &'static str,
    target: StorageTarget,
    pool: HashMap<Uuid, T>,
    unverified: HashSet<Uuid>,
    record_paths: HashMap<Uuid, PathBuf>,
}

impl<T> SubRepository<T>
where
    T: Entity + Clone + Serialize + DeserializeOwned,
{
    /// Creates an empty sub-repository and its data directory.
    ///
    /// # Errors
    /// Returns an I/O error if the data directory cannot be created.
    pub fn new(entry: StorageEntry, repo_root: &Path) -> Result<Self> {
        let target = StorageTarget::new(repo_root, entry.subdir);
        fsops::create_target_dir(&target.data_dir)?;
        Ok(Self {
            kind: entry.kind,
            extension: entry.extension,
            target,
            pool: HashMap::new(),
            unverified: HashSet::new(),
            record_paths: HashMap::new(),
        })
    }

    /// Component kind.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Display name.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// Storage target for this kind's data.
    #[must_use]
    pub fn target(&self) -> &StorageTarget {
        &self.target
    }

    /// Directory for this kind's data.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.target.data_dir
    }

    fn repo_root(&self) -> &Path {
        &self.target.repo_root
    }

    /// Record file for `entity`.
    #[must_use]
    pub fn record_path(&self, entity: &T) -> PathBuf {
        self.repo_root().join(format!(
            "{}.{}",
            hashing::stable_file_stem(&entity.identity()),
            self.extension
        ))
    }

    /// Scans the repository root for this kind's records.
    ///
    /// Records failing verification stay in the pool, flagged unverified.
    ///
    /// # Errors
    /// Returns an I/O error if the root cannot be listed.
    pub fn load(&mut self) -> Result<LoadReport> {
        self.pool.clear();
        self.unverified.clear();
        self.record_paths.clear();

        let root = self.repo_root().to_path_buf();
        let mut files: Vec<PathBuf> = fs::read_dir(&root)
            .at("Error reading", &root)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e == self.extension)
            })
            .collect();
        files.sort();

        let mut report = LoadReport::default();
        for path in files {
            let decoded = fs::read_to_string(&path)
                .at("Error reading", &path)
                .and_then(|text| record::decode::<T>(&text, self.kind));
            let mut entity = match decoded {
                Ok(entity) => entity,
                Err(e) => {
                    tracing::warn!("Skipping record {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            };
            entity.relocate(&root);

            let uuid = entity.core().uuid;
            if let Err(e) = entity.verify() {
                tracing::warn!("{} failed verification: {}", entity.display_name(), e);
                self.unverified.insert(uuid);
                report.unverified += 1;
            }
            self.record_paths.insert(uuid, path);
            self.pool.insert(uuid, entity);
            report.loaded += 1;
        }

        tracing::debug!(
            "{}: loaded {} ({} unverified, {} failed)",
            self.label(),
            report.loaded,
            report.unverified,
            report.failed
        );
        Ok(report)
    }

    fn check_kind(&self, entity: &T) -> Result<()> {
        if entity.kind() == self.kind {
            Ok(())
        } else {
            Err(DepotError::WrongComponentType {
                target: self.label().to_string(),
                found: entity.kind().to_string(),
            })
        }
    }

    fn check_unique(&self, entity: &T, ignore: Option<Uuid>) -> Result<()> {
        let identity = entity.identity();
        let clash = self.pool.iter().any(|(uuid, existing)| {
            Some(*uuid) != ignore && (*uuid == entity.core().uuid || existing.identity() == identity)
        });
        if clash {
            return Err(DepotError::Duplicate(
                entity.display_name(),
                self.label().to_string(),
            ));
        }
        Ok(())
    }

    fn write_record(&self, entity: &T) -> Result<PathBuf> {
        let path = self.record_path(entity);
        let text = record::encode(self.kind, entity)?;
        let root = self.repo_root();
        let mut file = tempfile::NamedTempFile::new_in(root).at("Error creating record in", root)?;
        file.write_all(text.as_bytes()).at("Error writing", &path)?;
        file.persist(&path)
            .map_err(|e| DepotError::io("Error writing", &path, e.error))?;
        Ok(path)
    }

    /// Inserts `entity` and writes its record.
    ///
    /// With `store` set, storable entities are first copied into the
    /// repository. Nothing is inserted when any step fails.
    ///
    /// # Errors
    /// Returns `WrongComponentType`, `Duplicate`, or storage and I/O errors.
    pub fn add(&mut self, mut entity: T, store: bool, delete_existing: bool) -> Result<Uuid> {
        self.check_kind(&entity)?;
        self.check_unique(&entity, None)?;

        let stored_now = self.store_if_requested(&mut entity, store, delete_existing)?;
        if stored_now {
            self.check_unique(&entity, None).inspect_err(|_| discard_data(&entity))?;
        }
        let path = self
            .write_record(&entity)
            .inspect_err(|_| if stored_now { discard_data(&entity) })?;

        let uuid = entity.core().uuid;
        tracing::info!("Added {} to {}", entity.display_name(), self.label());
        self.record_paths.insert(uuid, path);
        self.pool.insert(uuid, entity);
        Ok(uuid)
    }

    fn store_if_requested(&self, entity: &mut T, store: bool, delete_existing: bool) -> Result<bool> {
        let core = entity.core();
        if !store || !core.capabilities.can_store_in_repo || core.is_stored_in_repo() {
            return Ok(false);
        }
        entity.store_in_repo(&self.target, delete_existing)?;
        Ok(true)
    }

    /// Replaces the entity `old` with `entity`.
    ///
    /// The new record is written before the old one is removed. The old data
    /// is deleted only when it lived in the repository at a different path.
    ///
    /// # Errors
    /// Returns `NotFound`, `Duplicate`, or storage and I/O errors; the old
    /// entity stays in place on error.
    pub fn replace(&mut self, old: Uuid, mut entity: T, store: bool, delete_existing: bool) -> Result<Uuid> {
        self.check_kind(&entity)?;
        let previous = self
            .pool
            .get(&old)
            .cloned()
            .ok_or_else(|| DepotError::NotFound(old.to_string(), self.label().to_string()))?;
        self.check_unique(&entity, Some(old))?;

        let stored_now = self.store_if_requested(&mut entity, store, delete_existing)?;
        let path = self
            .write_record(&entity)
            .inspect_err(|_| if stored_now { discard_data(&entity) })?;

        let old_record = self.record_paths.remove(&old);
        if let Some(old_record) = old_record.filter(|p| *p != path) {
            fsops::remove_target_path(&old_record)?;
        }
        let same_data = previous.core().data_path() == entity.core().data_path();
        if previous.core().is_stored_in_repo() && !same_data {
            discard_data(&previous);
        }
        self.pool.remove(&old);
        self.unverified.remove(&old);

        let uuid = entity.core().uuid;
        tracing::info!("Replaced {} with {} in {}", previous.display_name(), entity.display_name(), self.label());
        self.record_paths.insert(uuid, path);
        self.pool.insert(uuid, entity);
        Ok(uuid)
    }

    /// Rewrites the record of an entity already in the pool.
    ///
    /// # Errors
    /// Returns `NotFound` or an I/O error.
    pub fn update(&mut self, entity: T) -> Result<()> {
        let uuid = entity.core().uuid;
        if !self.pool.contains_key(&uuid) {
            return Err(DepotError::NotFound(entity.display_name(), self.label().to_string()));
        }
        let path = self.write_record(&entity)?;
        if let Some(old) = self.record_paths.insert(uuid, path.clone()) {
            if old != path {
                fsops::remove_target_path(&old)?;
            }
        }
        match entity.verify() {
            Ok(()) => self.unverified.remove(&uuid),
            Err(_) => self.unverified.insert(uuid),
        };
        self.pool.insert(uuid, entity);
        Ok(())
    }

    /// Removes an entity, its record and, when stored, its data.
    ///
    /// # Errors
    /// Returns `NotFound` or an I/O error.
    pub fn remove(&mut self, uuid: Uuid) -> Result<T> {
        let entity = self
            .pool
            .get(&uuid)
            .ok_or_else(|| DepotError::NotFound(uuid.to_string(), self.label().to_string()))?;
        let record_path = self
            .record_paths
            .get(&uuid)
            .cloned()
            .unwrap_or_else(|| self.record_path(entity));
        fsops::remove_target_path(&record_path)?;
        if entity.core().is_stored_in_repo() {
            if let Some(data) = entity.core().data_path() {
                fsops::remove_target_path(data)?;
            }
        }

        self.record_paths.remove(&uuid);
        self.unverified.remove(&uuid);
        let entity = self
            .pool
            .remove(&uuid)
            .ok_or_else(|| DepotError::NotFound(uuid.to_string(), self.label().to_string()))?;
        tracing::info!("Removed {} from {}", entity.display_name(), self.label());
        Ok(entity)
    }

    /// Entity by uuid.
    #[must_use]
    pub fn get(&self, uuid: Uuid) -> Option<&T> {
        self.pool.get(&uuid)
    }

    /// Entities whose display or core name matches, case-insensitively.
    pub fn find_by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.pool.values().filter(move |e| {
            e.core().name.eq_ignore_ascii_case(name) || e.display_name().eq_ignore_ascii_case(name)
        })
    }

    /// Entities sorted by display name.
    #[must_use]
    pub fn sorted(&self) -> Vec<&T> {
        let mut entities: Vec<&T> = self.pool.values().collect();
        entities.sort_by_key(|e| e.display_name());
        entities
    }

    /// Iterates entities in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.pool.values()
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Returns true if the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Whether the entity passed its last verification.
    #[must_use]
    pub fn is_verified(&self, uuid: Uuid) -> bool {
        self.pool.contains_key(&uuid) && !self.unverified.contains(&uuid)
    }

    /// Number of entities that failed verification.
    #[must_use]
    pub fn unverified_count(&self) -> usize {
        self.unverified.len()
    }

    /// Re-verifies every entity.
    pub fn verify_all(&mut self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::with_capacity(self.pool.len());
        for (uuid, entity) in &self.pool {
            let result = entity.verify();
            if result.is_ok() {
                self.unverified.remove(uuid);
            } else {
                self.unverified.insert(*uuid);
            }
            results.push((entity.display_name(), result));
        }
        results
    }
}

fn discard_data<T: Entity>(entity: &T) {
    if let Some(data) = entity.core().data_path() {
        if let Err(e) = fsops::remove_target_path(data) {
            tracing::warn!("Could not clean up {}: {}", data.display(), e);
        }
    }
}
