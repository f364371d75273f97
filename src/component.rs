//! Shared component state and traits.
//!
//! Every storable entity embeds a [`ComponentCore`] that tracks where its
//! data lives. The four location fields (`data_path`, `source_path`,
//! `repo_relative_path`, `is_stored_in_repo`) only change together through
//! [`ComponentCore::bind`] and [`ComponentCore::commit_stored`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::addon::Addon;
use crate::config::Platform;
use crate::dev_library::PythonDevLibrary;
use crate::error::{DepotError, Result};
use crate::fsops;
use crate::hashing;
use crate::profile::Profile;
use crate::program::BlenderProgram;
use crate::script::Script;
use crate::setup::BlenderSetup;
use crate::venv::BlenderVenv;

/// Kind of a persisted component.
///
/// Released and dev variants of addons and scripts live in separate
/// sub-repositories, so they are separate kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Addon copied into the repository.
    ReleasedAddon,
    /// Addon symlinked from its source.
    DevAddon,
    /// Script copied into the repository.
    ReleasedScript,
    /// Script symlinked from its source.
    DevScript,
    /// Blender installation.
    Program,
    /// Virtual environment derived from a program.
    Venv,
    /// Python library under development.
    DevLibrary,
    /// Addon/script/config bundle.
    Setup,
    /// Program + setup + venv launch binding.
    Profile,
}

impl ComponentKind {
    /// All kinds, in repository order.
    pub const ALL: [Self; 9] = [
        Self::Program,
        Self::Venv,
        Self::Setup,
        Self::ReleasedAddon,
        Self::DevAddon,
        Self::ReleasedScript,
        Self::DevScript,
        Self::DevLibrary,
        Self::Profile,
    ];

    /// Human readable name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ReleasedAddon => "Addons",
            Self::DevAddon => "Dev Addons",
            Self::ReleasedScript => "Scripts",
            Self::DevScript => "Dev Scripts",
            Self::Program => "Blender Programs",
            Self::Venv => "Blender Venvs",
            Self::DevLibrary => "Dev Libraries",
            Self::Setup => "Blender Setups",
            Self::Profile => "Profiles",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Capability declarations checked before offering an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Data may be copied into the repository.
    pub can_store_in_repo: bool,
    /// Component may be renamed.
    pub is_renamable: bool,
    /// Component may be replaced by a newer version.
    pub is_upgradeable: bool,
    /// Component may be duplicated.
    pub is_duplicable: bool,
    /// Component contents may be edited.
    pub is_editable: bool,
}

impl Capabilities {
    /// Released artifacts: storable and upgradeable.
    pub const RELEASED: Self = Self {
        can_store_in_repo: true,
        is_renamable: false,
        is_upgradeable: true,
        is_duplicable: false,
        is_editable: false,
    };

    /// Dev artifacts: never copied, only linked.
    pub const DEV: Self = Self {
        can_store_in_repo: false,
        is_renamable: false,
        is_upgradeable: false,
        is_duplicable: false,
        is_editable: false,
    };

    /// Repository-owned aggregates such as setups.
    pub const AGGREGATE: Self = Self {
        can_store_in_repo: false,
        is_renamable: true,
        is_upgradeable: false,
        is_duplicable: true,
        is_editable: true,
    };
}

/// Lifecycle state derived from the location fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// No data path yet.
    Unbound,
    /// Data lives outside the repository.
    External,
    /// Data lives inside the repository.
    InRepo,
}

/// Where a component stores its governed data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    /// Repository root.
    pub repo_root: PathBuf,
    /// Directory for this component type's data.
    pub data_dir: PathBuf,
}

impl StorageTarget {
    /// Target under `repo_root/subdir` (or the root itself for an empty subdir).
    pub fn new(repo_root: impl Into<PathBuf>, subdir: &str) -> Self {
        let repo_root = repo_root.into();
        let data_dir = if subdir.is_empty() {
            repo_root.clone()
        } else {
            repo_root.join(subdir)
        };
        Self {
            repo_root,
            data_dir,
        }
    }
}

/// State shared by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCore {
    /// Random identity, used as the pool key.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    data_path: Option<PathBuf>,
    source_path: Option<PathBuf>,
    repo_relative_path: Option<PathBuf>,
    is_stored_in_repo: bool,
    /// Platform the component was created on.
    pub platform: Platform,
    /// Capability flags.
    pub capabilities: Capabilities,
}

impl ComponentCore {
    /// Creates an unbound core.
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            data_path: None,
            source_path: None,
            repo_relative_path: None,
            is_stored_in_repo: false,
            platform: Platform::current(),
            capabilities,
        }
    }

    /// Binds the core to `path`.
    ///
    /// A path under `repo_root` is treated as already stored.
    pub fn bind(&mut self, path: &Path, repo_root: Option<&Path>) {
        let relative = repo_root.and_then(|root| relative_to(path, root));
        self.data_path = Some(path.to_path_buf());
        if let Some(relative) = relative {
            self.source_path = None;
            self.repo_relative_path = Some(relative);
            self.is_stored_in_repo = true;
        } else {
            self.source_path = Some(path.to_path_buf());
            self.repo_relative_path = None;
            self.is_stored_in_repo = false;
        }
    }

    /// Records that the data now lives at `new_path` inside `repo_root`.
    ///
    /// All four location fields change together; nothing changes on error.
    ///
    /// # Errors
    /// Returns `Consistency` if `new_path` is not under `repo_root`.
    pub fn commit_stored(&mut self, new_path: &Path, repo_root: &Path) -> Result<()> {
        let relative = relative_to(new_path, repo_root).ok_or_else(|| {
            DepotError::Consistency(format!(
                "{} is not inside the repository {}",
                new_path.display(),
                repo_root.display()
            ))
        })?;
        let source = self.data_path.clone().or_else(|| self.source_path.clone());

        self.source_path = source;
        self.data_path = Some(new_path.to_path_buf());
        self.repo_relative_path = Some(relative);
        self.is_stored_in_repo = true;
        Ok(())
    }

    /// Re-resolves a stored component's data path against `repo_root`.
    pub fn relocate(&mut self, repo_root: &Path) {
        if let (true, Some(relative)) = (self.is_stored_in_repo, &self.repo_relative_path) {
            self.data_path = Some(repo_root.join(relative));
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BindState {
        match (&self.data_path, self.is_stored_in_repo) {
            (None, _) => BindState::Unbound,
            (Some(_), false) => BindState::External,
            (Some(_), true) => BindState::InRepo,
        }
    }

    /// Path of the governed data.
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    /// Data path, or `Validation` if unbound.
    ///
    /// # Errors
    /// Returns `Validation` for unbound components.
    pub fn require_data_path(&self) -> Result<&Path> {
        self.data_path()
            .ok_or_else(|| DepotError::Validation(format!("{} has no data path", self.name)))
    }

    /// External path the component was created from.
    #[must_use]
    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Path relative to the repository root, when stored.
    #[must_use]
    pub fn repo_relative_path(&self) -> Option<&Path> {
        self.repo_relative_path.as_deref()
    }

    /// Whether the data lives inside the repository.
    #[must_use]
    pub fn is_stored_in_repo(&self) -> bool {
        self.is_stored_in_repo
    }

    /// Canonical path string used for path-based equality.
    ///
    /// Existing paths are resolved through symlinks; missing ones are only
    /// normalised lexically.
    #[must_use]
    pub fn path_identity(&self) -> String {
        match (&self.repo_relative_path, &self.data_path) {
            (Some(rel), _) if self.is_stored_in_repo => fsops::to_posix_string(rel),
            (_, Some(path)) => {
                let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| fsops::normalize(path));
                fsops::to_posix_string(&resolved)
            }
            _ => self.uuid.to_string(),
        }
    }

    /// Checks that the governed path exists.
    ///
    /// # Errors
    /// Returns `PathNotFound` or `Validation` for unbound components.
    pub fn verify_exists(&self) -> Result<()> {
        let path = self.require_data_path()?;
        if fsops::entry_exists(path) {
            Ok(())
        } else {
            Err(DepotError::PathNotFound(path.to_path_buf()))
        }
    }

    /// Checks that the component was created on this platform.
    ///
    /// # Errors
    /// Returns `Validation` on mismatch.
    pub fn verify_platform(&self) -> Result<()> {
        let current = Platform::current();
        if self.platform == current {
            Ok(())
        } else {
            Err(DepotError::Validation(format!(
                "{} was created on {}, current platform is {}",
                self.name, self.platform, current
            )))
        }
    }

    /// Fails unless the component may be copied into the repository.
    ///
    /// # Errors
    /// Returns `NotAllowed` or `Consistency` when already stored.
    pub fn check_storable(&self, repo_root: &Path) -> Result<&Path> {
        if !self.capabilities.can_store_in_repo {
            return Err(DepotError::NotAllowed {
                operation: "Storing in the repository".to_string(),
                component: self.name.clone(),
            });
        }
        let path = self.require_data_path()?;
        if self.is_stored_in_repo || fsops::is_under(path, repo_root) {
            return Err(DepotError::Consistency(format!(
                "{} is already stored in the repository",
                self.name
            )));
        }
        Ok(path)
    }

    /// Copies the governed file or directory into `target.data_dir`.
    ///
    /// Directories are named after the component, files keep their file name.
    ///
    /// # Errors
    /// Returns an error if storage is not allowed, the target exists and
    /// `delete_existing` is false, or the copy fails.
    pub fn store_data(&mut self, target: &StorageTarget, delete_existing: bool) -> Result<PathBuf> {
        let source = self.check_storable(&target.repo_root)?.to_path_buf();
        let file_name = if source.is_dir() {
            fsops::sanitize_name(&self.name)
        } else {
            source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| DepotError::InvalidName(source.display().to_string()))?
        };
        let destination = target.data_dir.join(file_name);

        fsops::ready_target_path(&destination, delete_existing)?;
        fsops::copy_path(&source, &destination)?;
        self.commit_stored(&destination, &target.repo_root)?;
        tracing::info!("Stored {} at {}", self.name, destination.display());
        Ok(destination)
    }
}

fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    let path = fsops::normalize(path);
    let root = fsops::normalize(root);
    path.strip_prefix(&root).ok().map(Path::to_path_buf)
}

/// A persistable component.
pub trait Entity {
    /// Kind used to pick the sub-repository.
    fn kind(&self) -> ComponentKind;

    /// Shared state.
    fn core(&self) -> &ComponentCore;

    /// Shared state, mutably.
    fn core_mut(&mut self) -> &mut ComponentCore;

    /// Canonical string defining logical equality.
    fn identity(&self) -> String {
        self.core().path_identity()
    }

    /// Restart-safe hash of [`Entity::identity`].
    fn stable_hash(&self) -> u64 {
        hashing::stable_hash(&self.identity())
    }

    /// Display name.
    fn display_name(&self) -> String {
        self.core().name.clone()
    }

    /// Confirms the component is usable.
    ///
    /// # Errors
    /// Returns the first failed check.
    fn verify(&self) -> Result<()> {
        self.core().verify_exists()
    }

    /// Copies or repackages the governed data into the repository.
    ///
    /// # Errors
    /// Returns an error if storage is not allowed or fails.
    fn store_in_repo(&mut self, target: &StorageTarget, delete_existing: bool) -> Result<()> {
        self.core_mut().store_data(target, delete_existing).map(|_| ())
    }

    /// Re-resolves repository-relative paths after loading.
    fn relocate(&mut self, repo_root: &Path) {
        self.core_mut().relocate(repo_root);
    }
}

/// A component that can be materialised into a target directory.
pub trait Deployable {
    /// Deploys into `target_dir` and returns the created path.
    ///
    /// # Errors
    /// Returns `AlreadyExists` when the target exists and `delete_existing` is
    /// false, `SymlinkDenied` for refused links, or I/O and format errors.
    fn deploy(&self, target_dir: &Path, delete_existing: bool) -> Result<PathBuf>;
}

/// Closed set of component types.
#[derive(Debug, Clone)]
pub enum Component {
    /// Addon.
    Addon(Addon),
    /// Script.
    Script(Script),
    /// Blender installation.
    Program(BlenderProgram),
    /// Virtual environment.
    Venv(BlenderVenv),
    /// Dev library.
    DevLibrary(PythonDevLibrary),
    /// Setup aggregate.
    Setup(BlenderSetup),
    /// Profile aggregate.
    Profile(Profile),
}

impl Component {
    /// Borrows the entity behind the variant.
    #[must_use]
    pub fn entity(&self) -> &dyn Entity {
        match self {
            Self::Addon(c) => c,
            Self::Script(c) => c,
            Self::Program(c) => c,
            Self::Venv(c) => c,
            Self::DevLibrary(c) => c,
            Self::Setup(c) => c,
            Self::Profile(c) => c,
        }
    }

    /// Kind of the wrapped entity.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.entity().kind()
    }

    /// Display name of the wrapped entity.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.entity().display_name()
    }

    /// Verifies the wrapped entity.
    ///
    /// # Errors
    /// Returns the entity's verification error.
    pub fn verify(&self) -> Result<()> {
        self.entity().verify()
    }

    /// Builds a `WrongComponentType` error naming this component's kind.
    #[must_use]
    pub fn rejected_by(&self, target: &str) -> DepotError {
        DepotError::WrongComponentType {
            target: target.to_string(),
            found: self.kind().to_string(),
        }
    }
}

macro_rules! component_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Component {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

component_from! {
    Addon => Addon,
    Script => Script,
    Program => BlenderProgram,
    Venv => BlenderVenv,
    DevLibrary => PythonDevLibrary,
    Setup => BlenderSetup,
    Profile => Profile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let repo = tempfile::tempdir().unwrap();
        let external = tempfile::tempdir().unwrap();
        let file = external.path().join("thing.txt");
        std::fs::write(&file, "data").unwrap();

        let mut core = ComponentCore::new("thing", Capabilities::RELEASED);
        assert_eq!(core.state(), BindState::Unbound);

        core.bind(&file, Some(repo.path()));
        assert_eq!(core.state(), BindState::External);
        assert_eq!(core.source_path(), Some(file.as_path()));

        let target = StorageTarget::new(repo.path(), "Things");
        let stored = core.store_data(&target, false).unwrap();
        assert_eq!(core.state(), BindState::InRepo);
        assert_eq!(core.data_path(), Some(stored.as_path()));
        assert_eq!(core.source_path(), Some(file.as_path()));
        assert_eq!(
            core.repo_relative_path(),
            Some(Path::new("Things/thing.txt"))
        );
        assert_eq!(std::fs::read_to_string(stored).unwrap(), "data");
    }

    #[test]
    fn test_bind_inside_repo_is_stored() {
        let repo = tempfile::tempdir().unwrap();
        let inside = repo.path().join("Scripts").join("a.py");
        let mut core = ComponentCore::new("a", Capabilities::RELEASED);
        core.bind(&inside, Some(repo.path()));
        assert!(core.is_stored_in_repo());
        assert_eq!(core.repo_relative_path(), Some(Path::new("Scripts/a.py")));
    }

    #[test]
    fn test_store_refusals_leave_fields_untouched() {
        let repo = tempfile::tempdir().unwrap();
        let external = tempfile::tempdir().unwrap();
        let file = external.path().join("dev.py");
        std::fs::write(&file, "x").unwrap();

        let mut dev = ComponentCore::new("dev", Capabilities::DEV);
        dev.bind(&file, None);
        let before = dev.clone();
        let err = dev
            .store_data(&StorageTarget::new(repo.path(), "Scripts"), false)
            .unwrap_err();
        assert!(matches!(err, DepotError::NotAllowed { .. }));
        assert_eq!(dev, before);

        let mut released = ComponentCore::new("rel", Capabilities::RELEASED);
        released.bind(&file, None);
        let target = StorageTarget::new(repo.path(), "Scripts");
        std::fs::create_dir_all(&target.data_dir).unwrap();
        std::fs::write(target.data_dir.join("dev.py"), "old").unwrap();
        let before = released.clone();
        assert!(released.store_data(&target, false).unwrap_err().is_already_exists());
        assert_eq!(released, before);
    }

    #[test]
    fn test_relocate() {
        let repo = tempfile::tempdir().unwrap();
        let mut core = ComponentCore::new("a", Capabilities::RELEASED);
        core.bind(&repo.path().join("Addons/a.zip"), Some(repo.path()));

        let moved = tempfile::tempdir().unwrap();
        core.relocate(moved.path());
        assert_eq!(core.data_path(), Some(moved.path().join("Addons/a.zip").as_path()));
        assert_eq!(core.path_identity(), "Addons/a.zip");
    }

    #[cfg(unix)]
    #[test]
    fn test_path_identity_resolves_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        std::fs::write(real.join("thing.py"), "pass").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut direct = ComponentCore::new("thing", Capabilities::RELEASED);
        direct.bind(&real.join("thing.py"), None);
        let mut via_link = ComponentCore::new("thing", Capabilities::RELEASED);
        via_link.bind(&link.join("thing.py"), None);
        let mut dotted = ComponentCore::new("thing", Capabilities::RELEASED);
        dotted.bind(&link.join("..").join("real").join("thing.py"), None);

        assert_eq!(direct.path_identity(), via_link.path_identity());
        assert_eq!(direct.path_identity(), dotted.path_identity());
    }

    #[cfg(unix)]
    #[test]
    fn test_path_identity_of_missing_path_is_lexical() {
        let mut core = ComponentCore::new("a", Capabilities::RELEASED);
        core.bind(Path::new("/elsewhere/sub/../a.zip"), None);
        assert_eq!(core.path_identity(), "/elsewhere/a.zip");
    }

    #[test]
    fn test_commit_outside_repo_fails_atomically() {
        let repo = tempfile::tempdir().unwrap();
        let mut core = ComponentCore::new("a", Capabilities::RELEASED);
        core.bind(Path::new("/elsewhere/a.zip"), None);
        let before = core.clone();
        assert!(core.commit_stored(Path::new("/other/a.zip"), repo.path()).is_err());
        assert_eq!(core, before);
    }
}
