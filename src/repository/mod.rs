//! The component repository.
//!
//! One directory on disk, one [`SubRepository`] per component kind. All
//! mutations take `&mut self`; share a repository between threads behind a
//! `Mutex` so that mutations never interleave.

pub mod layout;
pub mod record;
pub mod sub;

use std::fmt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

pub use layout::{StorageEntry, StorageTable};
pub use sub::{LoadReport, SubRepository};

use crate::addon::Addon;
use crate::component::{Component, ComponentKind, Entity};
use crate::dev_library::PythonDevLibrary;
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;
use crate::outcome::BatchOutcome;
use crate::process::CommandRunner;
use crate::profile::Profile;
use crate::program::BlenderProgram;
use crate::script::Script;
use crate::setup::BlenderSetup;
use crate::venv::BlenderVenv;

/// Counts for one sub-repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRepoSummary {
    /// Component kind.
    pub kind: ComponentKind,
    /// Number of records.
    pub count: usize,
    /// Records that failed verification.
    pub unverified: usize,
}

/// Counts for the whole repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySummary {
    /// Repository root.
    pub root: PathBuf,
    /// One entry per kind.
    pub sub_repos: Vec<SubRepoSummary>,
}

impl RepositorySummary {
    /// Total number of records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.sub_repos.iter().map(|s| s.count).sum()
    }
}

impl fmt::Display for RepositorySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Repository: {}", self.root.display())?;
        for sub in &self.sub_repos {
            write!(f, "  {:<18} {:>4}", sub.kind.label(), sub.count)?;
            if sub.unverified > 0 {
                write!(f, "  ({} unverified)", sub.unverified)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// File-system backed component store.
#[derive(Debug)]
pub struct Repository {
    root: PathBuf,
    table: StorageTable,
    /// Blender installations.
    pub programs: SubRepository<BlenderProgram>,
    /// Virtual environments.
    pub venvs: SubRepository<BlenderVenv>,
    /// Setups.
    pub setups: SubRepository<BlenderSetup>,
    /// Released addons.
    pub addons: SubRepository<Addon>,
    /// Dev addons.
    pub dev_addons: SubRepository<Addon>,
    /// Released scripts.
    pub scripts: SubRepository<Script>,
    /// Dev scripts.
    pub dev_scripts: SubRepository<Script>,
    /// Dev libraries.
    pub dev_libraries: SubRepository<PythonDevLibrary>,
    /// Profiles.
    pub profiles: SubRepository<Profile>,
}

/// Runs `$body` with `$sub` bound to the sub-repository for `$kind`.
macro_rules! with_sub_repo {
    ($repo:expr, $kind:expr, |$sub:ident| $body:expr) => {
        match $kind {
            ComponentKind::Program => { let $sub = &$repo.programs; $body }
            ComponentKind::Venv => { let $sub = &$repo.venvs; $body }
            ComponentKind::Setup => { let $sub = &$repo.setups; $body }
            ComponentKind::ReleasedAddon => { let $sub = &$repo.addons; $body }
            ComponentKind::DevAddon => { let $sub = &$repo.dev_addons; $body }
            ComponentKind::ReleasedScript => { let $sub = &$repo.scripts; $body }
            ComponentKind::DevScript => { let $sub = &$repo.dev_scripts; $body }
            ComponentKind::DevLibrary => { let $sub = &$repo.dev_libraries; $body }
            ComponentKind::Profile => { let $sub = &$repo.profiles; $body }
        }
    };
}

impl Repository {
    /// Opens (creating if needed) the repository at `root` and loads it.
    ///
    /// # Errors
    /// Returns an I/O error if the root cannot be created or written.
    pub fn open(root: &Path) -> Result<Self> {
        fsops::create_target_dir(root)?;
        let root = std::path::absolute(root).at("Error resolving", root)?;
        tempfile::tempfile_in(&root).at("Repository is not writable:", &root)?;

        let table = StorageTable::default();
        let mut repo = Self {
            programs: SubRepository::new(table.entry(ComponentKind::Program), &root)?,
            venvs: SubRepository::new(table.entry(ComponentKind::Venv), &root)?,
            setups: SubRepository::new(table.entry(ComponentKind::Setup), &root)?,
            addons: SubRepository::new(table.entry(ComponentKind::ReleasedAddon), &root)?,
            dev_addons: SubRepository::new(table.entry(ComponentKind::DevAddon), &root)?,
            scripts: SubRepository::new(table.entry(ComponentKind::ReleasedScript), &root)?,
            dev_scripts: SubRepository::new(table.entry(ComponentKind::DevScript), &root)?,
            dev_libraries: SubRepository::new(table.entry(ComponentKind::DevLibrary), &root)?,
            profiles: SubRepository::new(table.entry(ComponentKind::Profile), &root)?,
            root,
            table,
        };
        repo.load()?;
        Ok(repo)
    }

    /// Reloads every sub-repository from disk and re-links venvs.
    ///
    /// # Errors
    /// Returns an I/O error if the root cannot be listed.
    pub fn load(&mut self) -> Result<LoadReport> {
        let reports = [
            self.programs.load()?,
            self.venvs.load()?,
            self.setups.load()?,
            self.addons.load()?,
            self.dev_addons.load()?,
            self.scripts.load()?,
            self.dev_scripts.load()?,
            self.dev_libraries.load()?,
            self.profiles.load()?,
        ];
        let total = reports.iter().fold(LoadReport::default(), |acc, r| LoadReport {
            loaded: acc.loaded + r.loaded,
            unverified: acc.unverified + r.unverified,
            failed: acc.failed + r.failed,
        });
        self.match_venvs_to_programs();
        tracing::info!(
            "Opened repository {} ({} records, {} unverified)",
            self.root.display(),
            total.loaded,
            total.unverified
        );
        Ok(total)
    }

    /// Repository root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage table.
    #[must_use]
    pub fn table(&self) -> &StorageTable {
        &self.table
    }

    /// Data directory for `kind`.
    #[must_use]
    pub fn data_dir(&self, kind: ComponentKind) -> PathBuf {
        let subdir = self.table.subdir(kind);
        if subdir.is_empty() {
            self.root.clone()
        } else {
            self.root.join(subdir)
        }
    }

    /// Adds a component to its sub-repository.
    ///
    /// With `store` set, storable components are copied into the repository
    /// first.
    ///
    /// # Errors
    /// Returns `Duplicate`, storage or I/O errors.
    pub fn add_component(&mut self, component: Component, store: bool, delete_existing: bool) -> Result<Uuid> {
        match component {
            Component::Addon(a) if a.is_dev() => self.dev_addons.add(a, store, delete_existing),
            Component::Addon(a) => self.addons.add(a, store, delete_existing),
            Component::Script(s) if s.variant().is_dev() => self.dev_scripts.add(s, store, delete_existing),
            Component::Script(s) => self.scripts.add(s, store, delete_existing),
            Component::Program(p) => self.programs.add(p, store, delete_existing),
            Component::Venv(v) => self.venvs.add(v, store, delete_existing),
            Component::DevLibrary(l) => self.dev_libraries.add(l, store, delete_existing),
            Component::Setup(s) => self.setups.add(s, store, delete_existing),
            Component::Profile(p) => self.profiles.add(p, store, delete_existing),
        }
    }

    /// Rewrites the record of a component already in the repository.
    ///
    /// # Errors
    /// Returns `NotFound` or an I/O error.
    pub fn update_component(&mut self, component: Component) -> Result<()> {
        match component {
            Component::Addon(a) if a.is_dev() => self.dev_addons.update(a),
            Component::Addon(a) => self.addons.update(a),
            Component::Script(s) if s.variant().is_dev() => self.dev_scripts.update(s),
            Component::Script(s) => self.scripts.update(s),
            Component::Program(p) => self.programs.update(p),
            Component::Venv(v) => self.venvs.update(v),
            Component::DevLibrary(l) => self.dev_libraries.update(l),
            Component::Setup(s) => self.setups.update(s),
            Component::Profile(p) => self.profiles.update(p),
        }
    }

    /// Removes a component, its record and its stored data.
    ///
    /// # Errors
    /// Returns `NotFound` or an I/O error.
    pub fn remove_component(&mut self, kind: ComponentKind, uuid: Uuid) -> Result<Component> {
        Ok(match kind {
            ComponentKind::Program => self.programs.remove(uuid)?.into(),
            ComponentKind::Venv => self.venvs.remove(uuid)?.into(),
            ComponentKind::Setup => self.setups.remove(uuid)?.into(),
            ComponentKind::ReleasedAddon => self.addons.remove(uuid)?.into(),
            ComponentKind::DevAddon => self.dev_addons.remove(uuid)?.into(),
            ComponentKind::ReleasedScript => self.scripts.remove(uuid)?.into(),
            ComponentKind::DevScript => self.dev_scripts.remove(uuid)?.into(),
            ComponentKind::DevLibrary => self.dev_libraries.remove(uuid)?.into(),
            ComponentKind::Profile => self.profiles.remove(uuid)?.into(),
        })
    }

    /// Looks up a component by kind and uuid.
    #[must_use]
    pub fn get(&self, kind: ComponentKind, uuid: Uuid) -> Option<Component> {
        with_sub_repo!(self, kind, |sub| sub.get(uuid).cloned().map(Component::from))
    }

    /// Finds components of `kind` by name, case-insensitively.
    #[must_use]
    pub fn find_by_name(&self, kind: ComponentKind, name: &str) -> Vec<Component> {
        with_sub_repo!(self, kind, |sub| sub
            .find_by_name(name)
            .cloned()
            .map(Component::from)
            .collect())
    }

    /// Finds a component of any kind by name or uuid.
    #[must_use]
    pub fn find(&self, query: &str) -> Vec<Component> {
        if let Ok(uuid) = Uuid::parse_str(query) {
            return ComponentKind::ALL
                .iter()
                .filter_map(|k| self.get(*k, uuid))
                .collect();
        }
        ComponentKind::ALL
            .iter()
            .flat_map(|k| self.find_by_name(*k, query))
            .collect()
    }

    /// Components of `kind`, sorted by display name.
    #[must_use]
    pub fn list(&self, kind: ComponentKind) -> Vec<Component> {
        with_sub_repo!(self, kind, |sub| sub
            .sorted()
            .into_iter()
            .cloned()
            .map(Component::from)
            .collect())
    }

    /// Replaces an existing component with a newer one ("latest wins").
    ///
    /// Addons replace the released addon with the same name and a strictly
    /// older version. Scripts replace the script with the same name.
    ///
    /// # Errors
    /// Returns `NotAllowed` for kinds that cannot be upgraded, `NotFound`
    /// when nothing matches, `Consistency` when the existing version is not
    /// older, or storage errors.
    pub fn upgrade_component(&mut self, component: Component, delete_existing: bool) -> Result<Uuid> {
        let upgradeable = component.entity().core().capabilities.is_upgradeable;
        if !upgradeable {
            return Err(DepotError::NotAllowed {
                operation: "Upgrading".to_string(),
                component: component.display_name(),
            });
        }

        match component {
            Component::Addon(addon) => {
                let existing = self
                    .addons
                    .iter()
                    .filter(|a| a.name().eq_ignore_ascii_case(addon.name()))
                    .max_by(|a, b| a.version().cmp(b.version()))
                    .map(|a| (a.core().uuid, a.version().clone()))
                    .ok_or_else(|| DepotError::NotFound(addon.name().to_string(), self.addons.label().to_string()))?;
                if addon.version() <= &existing.1 {
                    return Err(DepotError::Consistency(format!(
                        "{} is not newer than the stored {}",
                        addon.repo_display_name(),
                        existing.1
                    )));
                }
                self.addons.replace(existing.0, addon, true, delete_existing)
            }
            Component::Script(script) => {
                let existing = self
                    .scripts
                    .iter()
                    .find(|s| s.core().name == script.core().name && s.variant() == script.variant())
                    .map(|s| s.core().uuid)
                    .ok_or_else(|| DepotError::NotFound(script.core().name.clone(), self.scripts.label().to_string()))?;
                self.scripts.replace(existing, script, true, true)
            }
            other => Err(DepotError::NotAllowed {
                operation: "Upgrading".to_string(),
                component: other.display_name(),
            }),
        }
    }

    /// Links every venv to the repository program with a matching executable.
    ///
    /// Returns how many venv records changed.
    pub fn match_venvs_to_programs(&mut self) -> usize {
        let mut changed = Vec::new();
        for venv in self.venvs.iter() {
            let Some(program) = self.programs.iter().find(|p| venv.originates_from(p)) else {
                continue;
            };
            if venv.program_link().uuid != Some(program.core().uuid) {
                let mut linked = venv.clone();
                if linked.link_program(program).is_ok() {
                    changed.push(linked);
                }
            }
        }

        let count = changed.len();
        for venv in changed {
            let name = venv.display_name();
            if let Err(e) = self.venvs.update(venv) {
                tracing::warn!("Could not relink venv {}: {}", name, e);
            }
        }
        if count > 0 {
            tracing::info!("Linked {} venvs to repository programs", count);
        }
        count
    }

    /// Probes and adds a program.
    ///
    /// # Errors
    /// Returns probe errors or `Duplicate`.
    pub fn add_program(&mut self, blender_exe: &Path, runner: &dyn CommandRunner) -> Result<Uuid> {
        let program = BlenderProgram::probe(blender_exe, runner, Some(&self.root))?;
        let uuid = self.programs.add(program, false, false)?;
        self.match_venvs_to_programs();
        Ok(uuid)
    }

    /// Creates a venv under `Venvs/<name>` from a repository program.
    ///
    /// # Errors
    /// Returns `InvalidName`, `NotFound`, or venv creation errors.
    pub fn create_venv(
        &mut self,
        program: Uuid,
        name: &str,
        runner: &dyn CommandRunner,
        delete_existing: bool,
    ) -> Result<Uuid> {
        fsops::validate_name(name)?;
        let program = self
            .programs
            .get(program)
            .ok_or_else(|| DepotError::NotFound(program.to_string(), self.programs.label().to_string()))?;
        let dir = self.venvs.data_dir().join(name);
        let venv = BlenderVenv::create_from_program(program, &dir, runner, Some(&self.root), delete_existing)?;
        self.venvs.add(venv, false, false).inspect_err(|_| {
            if let Err(e) = fsops::remove_target_path(&dir) {
                tracing::warn!("Could not clean up {}: {}", dir.display(), e);
            }
        })
    }

    /// Creates and adds a setup under `Setups/<name>`.
    ///
    /// # Errors
    /// Returns `InvalidName`, `AlreadyExists` or I/O errors.
    pub fn create_setup(&mut self, name: &str) -> Result<Uuid> {
        let setup = BlenderSetup::create(name, self.setups.data_dir(), Some(&self.root))?;
        let dir = setup.setup_dir()?.to_path_buf();
        self.setups
            .add(setup, false, false)
            .inspect_err(|_| discard_dir(&dir))
    }

    /// Creates and adds a profile under `Profiles/<name>`.
    ///
    /// # Errors
    /// Returns `InvalidName`, `AlreadyExists` or I/O errors.
    pub fn create_profile(&mut self, name: &str) -> Result<Uuid> {
        let profile = Profile::create(name, self.profiles.data_dir(), Some(&self.root))?;
        let dir = profile.profile_dir().map(Path::to_path_buf);
        self.profiles.add(profile, false, false).inspect_err(|_| {
            if let Some(dir) = &dir {
                discard_dir(dir);
            }
        })
    }

    /// Re-verifies every component.
    pub fn verify_all(&mut self) -> BatchOutcome<()> {
        let mut results = Vec::new();
        results.extend(self.programs.verify_all());
        results.extend(self.venvs.verify_all());
        results.extend(self.setups.verify_all());
        results.extend(self.addons.verify_all());
        results.extend(self.dev_addons.verify_all());
        results.extend(self.scripts.verify_all());
        results.extend(self.dev_scripts.verify_all());
        results.extend(self.dev_libraries.verify_all());
        results.extend(self.profiles.verify_all());
        BatchOutcome::collect(results)
    }

    /// Per-kind record counts.
    #[must_use]
    pub fn summary(&self) -> RepositorySummary {
        let sub_repos = ComponentKind::ALL
            .iter()
            .map(|kind| {
                with_sub_repo!(self, *kind, |sub| SubRepoSummary {
                    kind: *kind,
                    count: sub.len(),
                    unverified: sub.unverified_count(),
                })
            })
            .collect();
        RepositorySummary {
            root: self.root.clone(),
            sub_repos,
        }
    }
}

fn discard_dir(dir: &Path) {
    if let Err(e) = fsops::remove_target_path(dir) {
        tracing::warn!("Could not clean up {}: {}", dir.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("depot");
        let repo = Repository::open(&root).unwrap();
        for sub in ["Addons", "Scripts", "Venvs", "Setups", "Profiles"] {
            assert!(root.join(sub).is_dir(), "{} missing", sub);
        }
        assert_eq!(repo.summary().total(), 0);
        assert_eq!(repo.data_dir(ComponentKind::Program), repo.root());
    }

    #[test]
    fn test_create_setup_and_profile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::open(dir.path()).unwrap();
        let setup = repo.create_setup("studio").unwrap();
        let profile = repo.create_profile("daily").unwrap();
        assert!(repo.create_setup("studio").unwrap_err().is_already_exists());

        let reopened = Repository::open(dir.path()).unwrap();
        assert!(reopened.get(ComponentKind::Setup, setup).is_some());
        assert!(reopened.get(ComponentKind::Profile, profile).is_some());
        assert!(reopened.setups.is_verified(setup));
        assert_eq!(reopened.find("STUDIO").len(), 1);
        assert_eq!(reopened.find(&profile.to_string()).len(), 1);
    }

    #[test]
    fn test_summary_display() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::open(dir.path()).unwrap();
        repo.create_setup("a").unwrap();
        let text = repo.summary().to_string();
        assert!(text.contains("Blender Setups"));
        assert_eq!(repo.summary().total(), 1);
    }
}
