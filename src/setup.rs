//! Blender setups: addon, script and user-config bundles.
//!
//! A setup owns a directory laid out the way Blender expects a user scripts
//! root, plus an optional user-config directory:
//!
//! ```text
//! Setups/<name>/
//!     setup.json
//!     config/
//!     scripts/addons/
//!     scripts/startup/
//!     scripts/depot_scripts/
//! ```
//!
//! Members are deployed into the directory first and only recorded once the
//! deploy succeeded.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::{
    Capabilities, Component, ComponentCore, ComponentKind, Deployable, Entity,
};
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;
use crate::script::{DEPOT_SCRIPTS_DIR, STARTUP_DIR};

/// Sidecar file name inside a setup directory.
pub const SETUP_CONFIG_FILE: &str = "setup.json";

const CONFIG_DIR: &str = "config";
const SCRIPTS_DIR: &str = "scripts";
const ADDONS_DIR: &str = "addons";

/// A deployed member of a setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupMember {
    /// Uuid of the repository component.
    pub uuid: Uuid,
    /// Component kind.
    pub kind: ComponentKind,
    /// Component display name.
    pub name: String,
    /// Logical identity, used to refuse duplicates.
    pub identity: String,
    /// Deployed path, relative to the setup directory.
    pub deployed_path: PathBuf,
}

/// Contents of `setup.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Setup name.
    pub name: String,
    /// Whether `config/` is used as the Blender user config.
    #[serde(default)]
    pub has_blender_config: bool,
    /// Deployed members.
    #[serde(default)]
    pub members: Vec<SetupMember>,
    /// Free-form settings.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// A named bundle of addons, scripts and an optional user config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlenderSetup {
    core: ComponentCore,
    config: SetupConfig,
}

impl BlenderSetup {
    /// Creates a new setup directory `setups_dir/<name>`.
    ///
    /// # Errors
    /// Returns `InvalidName`, `AlreadyExists` or an I/O error.
    pub fn create(name: &str, setups_dir: &Path, repo_root: Option<&Path>) -> Result<Self> {
        fsops::validate_name(name)?;
        let dir = setups_dir.join(name);
        if fsops::entry_exists(&dir) {
            return Err(DepotError::AlreadyExists(dir));
        }
        for sub in [ADDONS_DIR, STARTUP_DIR, DEPOT_SCRIPTS_DIR] {
            fsops::create_target_dir(&dir.join(SCRIPTS_DIR).join(sub))?;
        }

        let mut core = ComponentCore::new(name, Capabilities::AGGREGATE);
        core.bind(&dir, repo_root);
        let setup = Self {
            core,
            config: SetupConfig {
                name: name.to_string(),
                ..SetupConfig::default()
            },
        };
        setup.save_config()?;
        tracing::info!("Created setup {} at {}", name, dir.display());
        Ok(setup)
    }

    /// Loads a setup from its directory and sidecar.
    ///
    /// # Errors
    /// Returns `PathNotFound` or a JSON error.
    pub fn load(dir: &Path, repo_root: Option<&Path>) -> Result<Self> {
        let sidecar = dir.join(SETUP_CONFIG_FILE);
        if !sidecar.is_file() {
            return Err(DepotError::PathNotFound(sidecar));
        }
        let config: SetupConfig =
            serde_json::from_str(&fs::read_to_string(&sidecar).at("Error reading", &sidecar)?)?;
        let mut core = ComponentCore::new(config.name.clone(), Capabilities::AGGREGATE);
        core.bind(dir, repo_root);
        Ok(Self { core, config })
    }

    /// Writes `setup.json`.
    ///
    /// # Errors
    /// Returns an I/O or JSON error.
    pub fn save_config(&self) -> Result<()> {
        let sidecar = self.setup_dir()?.join(SETUP_CONFIG_FILE);
        let json = serde_json::to_string_pretty(&self.config)?;
        fs::write(&sidecar, json).at("Error writing", &sidecar)
    }

    /// Setup directory.
    ///
    /// # Errors
    /// Returns `Validation` if the setup is unbound.
    pub fn setup_dir(&self) -> Result<&Path> {
        self.core.require_data_path()
    }

    /// `config/` directory used as `BLENDER_USER_CONFIG`.
    pub fn config_dir(&self) -> Result<PathBuf> {
        Ok(self.setup_dir()?.join(CONFIG_DIR))
    }

    /// `scripts/` directory used as `BLENDER_USER_SCRIPTS`.
    pub fn scripts_dir(&self) -> Result<PathBuf> {
        Ok(self.setup_dir()?.join(SCRIPTS_DIR))
    }

    /// Sidecar contents.
    #[must_use]
    pub fn config(&self) -> &SetupConfig {
        &self.config
    }

    /// Whether a custom user config is present.
    #[must_use]
    pub fn has_blender_config(&self) -> bool {
        self.config.has_blender_config
    }

    /// Deployed members.
    #[must_use]
    pub fn members(&self) -> &[SetupMember] {
        &self.config.members
    }

    /// Members of one kind.
    pub fn members_of(&self, kind: ComponentKind) -> impl Iterator<Item = &SetupMember> {
        self.config.members.iter().filter(move |m| m.kind == kind)
    }

    /// Sets a free-form setting and saves the sidecar.
    ///
    /// # Errors
    /// Returns an I/O or JSON error; the in-memory value is rolled back.
    pub fn set_setting(&mut self, key: &str, value: &str) -> Result<()> {
        let previous = self
            .config
            .settings
            .insert(key.to_string(), value.to_string());
        if let Err(e) = self.save_config() {
            match previous {
                Some(v) => self.config.settings.insert(key.to_string(), v),
                None => self.config.settings.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Deploys an addon or script into the setup and records it.
    ///
    /// # Errors
    /// Returns `WrongComponentType` for other kinds, `Duplicate` if the
    /// component is already a member and `delete_existing` is false, or the
    /// deploy error.
    pub fn add_component(&mut self, component: &Component, delete_existing: bool) -> Result<PathBuf> {
        let scripts_dir = self.scripts_dir()?;
        let (entity, deployed) = match component {
            Component::Addon(addon) => {
                let entity: &dyn Entity = addon;
                self.check_not_member(entity, delete_existing)?;
                (entity, addon.deploy(&scripts_dir.join(ADDONS_DIR), delete_existing)?)
            }
            Component::Script(script) => {
                let entity: &dyn Entity = script;
                self.check_not_member(entity, delete_existing)?;
                (entity, script.deploy(&scripts_dir, delete_existing)?)
            }
            other => return Err(other.rejected_by("Blender setup")),
        };

        let setup_dir = self.setup_dir()?.to_path_buf();
        let relative = deployed
            .strip_prefix(&setup_dir)
            .map_or_else(|_| deployed.clone(), Path::to_path_buf);
        let identity = entity.identity();
        self.config.members.retain(|m| m.identity != identity);
        self.config.members.push(SetupMember {
            uuid: entity.core().uuid,
            kind: entity.kind(),
            name: entity.display_name(),
            identity,
            deployed_path: relative,
        });
        self.save_config()?;
        tracing::info!("Added {} to setup {}", entity.display_name(), self.core.name);
        Ok(deployed)
    }

    fn check_not_member(&self, entity: &dyn Entity, delete_existing: bool) -> Result<()> {
        let identity = entity.identity();
        if !delete_existing && self.config.members.iter().any(|m| m.identity == identity) {
            return Err(DepotError::Duplicate(
                entity.display_name(),
                self.core.name.clone(),
            ));
        }
        Ok(())
    }

    /// Removes the member with `uuid` and its deployed files.
    ///
    /// # Errors
    /// Returns `NotFound` or an I/O error.
    pub fn remove_component(&mut self, uuid: Uuid) -> Result<SetupMember> {
        let index = self
            .config
            .members
            .iter()
            .position(|m| m.uuid == uuid)
            .ok_or_else(|| DepotError::NotFound(uuid.to_string(), self.core.name.clone()))?;

        let deployed = self.setup_dir()?.join(&self.config.members[index].deployed_path);
        fsops::remove_target_path(&deployed)?;
        let member = self.config.members.remove(index);
        self.save_config()?;
        tracing::info!("Removed {} from setup {}", member.name, self.core.name);
        Ok(member)
    }

    /// Creates the `config/` directory and marks it as the user config.
    ///
    /// # Errors
    /// Returns an I/O error.
    pub fn add_blender_config(&mut self) -> Result<PathBuf> {
        let dir = self.config_dir()?;
        fsops::create_target_dir(&dir)?;
        self.config.has_blender_config = true;
        self.save_config()?;
        Ok(dir)
    }

    /// Deletes the `config/` directory.
    ///
    /// # Errors
    /// Returns an I/O error.
    pub fn remove_blender_config(&mut self) -> Result<()> {
        fsops::remove_target_path(&self.config_dir()?)?;
        self.config.has_blender_config = false;
        self.save_config()
    }

    /// Renames the setup and its directory.
    ///
    /// # Errors
    /// Returns `InvalidName`, `AlreadyExists` or an I/O error. Nothing is
    /// changed on error.
    pub fn rename(&mut self, new_name: &str, repo_root: Option<&Path>) -> Result<()> {
        fsops::validate_name(new_name)?;
        let old_dir = self.setup_dir()?.to_path_buf();
        let new_dir = sibling_dir(&old_dir, new_name);
        if fsops::entry_exists(&new_dir) {
            return Err(DepotError::AlreadyExists(new_dir));
        }

        fs::rename(&old_dir, &new_dir).at("Error renaming", &old_dir)?;
        self.core.name = new_name.to_string();
        self.core.bind(&new_dir, repo_root);
        self.config.name = new_name.to_string();
        self.save_config()?;
        tracing::info!("Renamed setup to {}", new_name);
        Ok(())
    }

    /// Copies the setup to a sibling directory named `new_name`.
    ///
    /// Symlinked dev members stay symlinks in the copy.
    ///
    /// # Errors
    /// Returns `InvalidName`, `AlreadyExists` or a copy error.
    pub fn duplicate(&self, new_name: &str, repo_root: Option<&Path>) -> Result<Self> {
        fsops::validate_name(new_name)?;
        let old_dir = self.setup_dir()?;
        let new_dir = sibling_dir(old_dir, new_name);
        if fsops::entry_exists(&new_dir) {
            return Err(DepotError::AlreadyExists(new_dir));
        }

        fsops::copy_dir_preserving_symlinks(old_dir, &new_dir)?;
        let mut core = ComponentCore::new(new_name, Capabilities::AGGREGATE);
        core.bind(&new_dir, repo_root);
        let copy = Self {
            core,
            config: SetupConfig {
                name: new_name.to_string(),
                ..self.config.clone()
            },
        };
        copy.save_config()?;
        tracing::info!("Duplicated setup {} as {}", self.core.name, new_name);
        Ok(copy)
    }
}

fn sibling_dir(dir: &Path, name: &str) -> PathBuf {
    dir.parent()
        .map_or_else(|| PathBuf::from(name), |p| p.join(name))
}

impl Entity for BlenderSetup {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Setup
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn verify(&self) -> Result<()> {
        self.core.verify_exists()?;
        let dir = self.setup_dir()?;
        let sidecar = dir.join(SETUP_CONFIG_FILE);
        if !sidecar.is_file() {
            return Err(DepotError::PathNotFound(sidecar));
        }
        for member in &self.config.members {
            let deployed = dir.join(&member.deployed_path);
            if !fsops::entry_exists(&deployed) {
                return Err(DepotError::PathNotFound(deployed));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{Script, ScriptVariant};

    fn setup_in(dir: &Path) -> BlenderSetup {
        BlenderSetup::create("studio", &dir.join("Setups"), Some(dir)).unwrap()
    }

    #[test]
    fn test_create_layout_and_reload() {
        let repo = tempfile::tempdir().unwrap();
        let setup = setup_in(repo.path());
        let dir = setup.setup_dir().unwrap();
        assert!(dir.join("scripts/addons").is_dir());
        assert!(dir.join("scripts/startup").is_dir());
        assert!(dir.join("scripts/depot_scripts").is_dir());
        assert!(setup.core().is_stored_in_repo());

        let loaded = BlenderSetup::load(dir, Some(repo.path())).unwrap();
        assert_eq!(loaded.config(), setup.config());
        assert!(setup.verify().is_ok());
    }

    #[test]
    fn test_invalid_and_duplicate_names() {
        let repo = tempfile::tempdir().unwrap();
        let setups = repo.path().join("Setups");
        assert!(matches!(
            BlenderSetup::create("bad/name", &setups, None),
            Err(DepotError::InvalidName(_))
        ));
        setup_in(repo.path());
        assert!(BlenderSetup::create("studio", &setups, None).unwrap_err().is_already_exists());
    }

    #[test]
    fn test_add_and_remove_script() {
        let repo = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let file = src.path().join("tool.py");
        fs::write(&file, "print('hi')").unwrap();
        let script = Script::new(&file, ScriptVariant::Startup, None).unwrap();
        let uuid = script.core().uuid;

        let mut setup = setup_in(repo.path());
        let deployed = setup.add_component(&Component::Script(script.clone()), false).unwrap();
        assert!(deployed.ends_with("scripts/startup/tool.py"));
        assert_eq!(setup.members().len(), 1);
        assert_eq!(setup.members()[0].deployed_path, Path::new("scripts/startup/tool.py"));

        let again = setup.add_component(&Component::Script(script), false);
        assert!(matches!(again, Err(DepotError::Duplicate(..))));
        assert_eq!(setup.members().len(), 1);

        setup.remove_component(uuid).unwrap();
        assert!(!deployed.exists());
        assert!(setup.members().is_empty());
        assert!(matches!(
            setup.remove_component(uuid),
            Err(DepotError::NotFound(..))
        ));
    }

    #[test]
    fn test_rejects_other_components() {
        let repo = tempfile::tempdir().unwrap();
        let mut setup = setup_in(repo.path());
        let other = Component::Setup(setup.clone());
        assert!(matches!(
            setup.add_component(&other, false),
            Err(DepotError::WrongComponentType { .. })
        ));
        assert!(setup.members().is_empty());
    }

    #[test]
    fn test_blender_config_toggle() {
        let repo = tempfile::tempdir().unwrap();
        let mut setup = setup_in(repo.path());
        let dir = setup.add_blender_config().unwrap();
        assert!(dir.is_dir());
        assert!(setup.has_blender_config());
        setup.remove_blender_config().unwrap();
        assert!(!dir.exists());
        assert!(!setup.has_blender_config());
    }

    #[test]
    fn test_rename_and_duplicate() {
        let repo = tempfile::tempdir().unwrap();
        let mut setup = setup_in(repo.path());
        setup.set_setting("theme", "dark").unwrap();

        setup.rename("render", Some(repo.path())).unwrap();
        let renamed_dir = repo.path().join("Setups").join("render");
        assert_eq!(setup.setup_dir().unwrap(), renamed_dir.as_path());
        assert!(!repo.path().join("Setups").join("studio").exists());
        assert_eq!(setup.config().name, "render");

        let copy = setup.duplicate("render_copy", Some(repo.path())).unwrap();
        assert_ne!(copy.core().uuid, setup.core().uuid);
        assert_eq!(copy.config().settings.get("theme").map(String::as_str), Some("dark"));
        assert!(BlenderSetup::load(copy.setup_dir().unwrap(), None).is_ok());
        assert!(setup.duplicate("render_copy", None).unwrap_err().is_already_exists());
    }
}
