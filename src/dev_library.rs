//! Python libraries under development.
//!
//! A dev library is a directory that stays where it is; venvs and profiles
//! reach it through a symlink.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::component::{Capabilities, ComponentCore, ComponentKind, Deployable, Entity};
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;

/// A Python library directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PythonDevLibrary {
    core: ComponentCore,
}

impl PythonDevLibrary {
    /// Creates a dev library for the directory at `path`.
    ///
    /// # Errors
    /// Returns `PathNotFound` or `Validation` if `path` is not a directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DepotError::PathNotFound(path.to_path_buf()));
        }
        if !path.is_dir() {
            return Err(DepotError::Validation(format!(
                "{} is not a library directory",
                path.display()
            )));
        }
        let path = std::path::absolute(path).at("Error resolving", path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DepotError::InvalidName(path.display().to_string()))?;

        let mut core = ComponentCore::new(name, Capabilities::DEV);
        core.bind(&path, None);
        Ok(Self { core })
    }

    /// Library directory.
    #[must_use]
    pub fn library_path(&self) -> Option<&Path> {
        self.core.data_path()
    }
}

impl Entity for PythonDevLibrary {
    fn kind(&self) -> ComponentKind {
        ComponentKind::DevLibrary
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }
}

impl Deployable for PythonDevLibrary {
    fn deploy(&self, target_dir: &Path, delete_existing: bool) -> Result<PathBuf> {
        let source = self.core.require_data_path()?;
        let link = target_dir.join(&self.core.name);
        fsops::ready_target_path(&link, delete_existing)?;
        fsops::create_symlink(source, &link)?;
        tracing::info!("Linked dev library {} at {}", self.core.name, link.display());
        Ok(link)
    }
}
