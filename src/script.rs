//! Standalone Blender scripts.
//!
//! Regular scripts deploy to `<root>/depot_scripts`, startup scripts to
//! `<root>/startup`. Released scripts are copied, dev scripts are linked.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::component::{
    Capabilities, ComponentCore, ComponentKind, Deployable, Entity, StorageTarget,
};
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;

/// Scripts directory for regular scripts under a deploy root.
pub const DEPOT_SCRIPTS_DIR: &str = "depot_scripts";

/// Scripts directory Blender runs on startup.
pub const STARTUP_DIR: &str = "startup";

/// Script variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptVariant {
    /// Released regular script.
    Regular,
    /// Released startup script.
    Startup,
    /// Dev regular script.
    DevRegular,
    /// Dev startup script.
    DevStartup,
}

impl ScriptVariant {
    /// Builds a variant from its two axes.
    #[must_use]
    pub fn new(startup: bool, dev: bool) -> Self {
        match (startup, dev) {
            (false, false) => Self::Regular,
            (true, false) => Self::Startup,
            (false, true) => Self::DevRegular,
            (true, true) => Self::DevStartup,
        }
    }

    /// Returns true for dev variants.
    #[must_use]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::DevRegular | Self::DevStartup)
    }

    /// Returns true for startup variants.
    #[must_use]
    pub fn is_startup(self) -> bool {
        matches!(self, Self::Startup | Self::DevStartup)
    }

    /// Deploy sub-directory under a scripts root.
    #[must_use]
    pub fn deploy_subdir(self) -> &'static str {
        if self.is_startup() {
            STARTUP_DIR
        } else {
            DEPOT_SCRIPTS_DIR
        }
    }

    /// Storage sub-directory under the scripts data directory.
    #[must_use]
    pub fn storage_subdir(self) -> &'static str {
        if self.is_startup() { "startup" } else { "regular" }
    }
}

impl fmt::Display for ScriptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Regular => "script",
            Self::Startup => "startup script",
            Self::DevRegular => "dev script",
            Self::DevStartup => "dev startup script",
        };
        f.write_str(label)
    }
}

/// A single-file Blender script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    core: ComponentCore,
    variant: ScriptVariant,
}

impl Script {
    /// Creates a script component for the `.py` file at `path`.
    ///
    /// # Errors
    /// Returns `PathNotFound` or `Validation` if the path is not a `.py` file.
    pub fn new(path: &Path, variant: ScriptVariant, repo_root: Option<&Path>) -> Result<Self> {
        if !path.exists() {
            return Err(DepotError::PathNotFound(path.to_path_buf()));
        }
        let is_py = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("py"));
        if !path.is_file() || !is_py {
            return Err(DepotError::Validation(format!(
                "{} is not a Python script",
                path.display()
            )));
        }

        let path = std::path::absolute(path).at("Error resolving", path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| DepotError::InvalidName(path.display().to_string()))?;

        let capabilities = if variant.is_dev() {
            Capabilities::DEV
        } else {
            Capabilities::RELEASED
        };
        let mut core = ComponentCore::new(name, capabilities);
        core.bind(&path, if variant.is_dev() { None } else { repo_root });
        Ok(Self { core, variant })
    }

    /// Script variant.
    #[must_use]
    pub fn variant(&self) -> ScriptVariant {
        self.variant
    }

    /// Path of the script file.
    #[must_use]
    pub fn script_path(&self) -> Option<&Path> {
        self.core.data_path()
    }

    fn file_name(&self) -> Result<String> {
        let path = self.core.require_data_path()?;
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DepotError::InvalidName(path.display().to_string()))
    }
}

impl PartialEq for Script {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Script {}

impl Entity for Script {
    fn kind(&self) -> ComponentKind {
        if self.variant.is_dev() {
            ComponentKind::DevScript
        } else {
            ComponentKind::ReleasedScript
        }
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn store_in_repo(&mut self, target: &StorageTarget, delete_existing: bool) -> Result<()> {
        let nested = StorageTarget {
            repo_root: target.repo_root.clone(),
            data_dir: target.data_dir.join(self.variant.storage_subdir()),
        };
        self.core.store_data(&nested, delete_existing).map(|_| ())
    }
}

impl Deployable for Script {
    /// Deploys into `<target_dir>/depot_scripts` or `<target_dir>/startup`.
    fn deploy(&self, target_dir: &Path, delete_existing: bool) -> Result<PathBuf> {
        let source = self.core.require_data_path()?;
        let deployed = target_dir
            .join(self.variant.deploy_subdir())
            .join(self.file_name()?);
        fsops::ready_target_path(&deployed, delete_existing)?;

        if self.variant.is_dev() {
            fsops::create_symlink(source, &deployed)?;
        } else {
            fsops::copy_path(source, &deployed)?;
        }
        tracing::info!("Deployed {} {} to {}", self.variant, self.core.name, deployed.display());
        Ok(deployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_variant_axes() {
        assert_eq!(ScriptVariant::new(true, true), ScriptVariant::DevStartup);
        assert_eq!(ScriptVariant::new(false, false), ScriptVariant::Regular);
        assert_eq!(ScriptVariant::Startup.deploy_subdir(), STARTUP_DIR);
        assert_eq!(ScriptVariant::DevRegular.deploy_subdir(), DEPOT_SCRIPTS_DIR);
    }

    #[test]
    fn test_rejects_non_python() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("notes.txt");
        fs::write(&txt, "x").unwrap();
        assert!(matches!(
            Script::new(&txt, ScriptVariant::Regular, None),
            Err(DepotError::Validation(_))
        ));
        assert!(matches!(
            Script::new(&dir.path().join("gone.py"), ScriptVariant::Regular, None),
            Err(DepotError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_name_is_stem_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("render_all.py");
        fs::write(&file, "import bpy").unwrap();
        let script = Script::new(&file, ScriptVariant::DevStartup, None).unwrap();
        assert_eq!(script.core().name, "render_all");
        assert_eq!(script.kind(), ComponentKind::DevScript);
    }
}
