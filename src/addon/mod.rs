//! Blender addons.
//!
//! An [`Addon`] is created by [`detect`] (released) or [`detect_dev`] (dev).
//! Released addons are stored in the repository as one canonical zip and
//! deployed by extraction; dev addons stay where they are and are deployed as
//! symlinks.

pub mod archive;
pub mod detect;
pub mod metadata;

use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use detect::{AddonShape, INIT_FILE, detect, detect_dev};
pub use metadata::AddonInfo;

use self::archive::Layout;
use crate::component::{
    Capabilities, ComponentCore, ComponentKind, Deployable, Entity, StorageTarget,
};
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;
use crate::version::LooseVersion;

/// Packaging of an addon's current data path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum AddonVariant {
    /// Zip archive. `entry` is the metadata file inside it.
    Zipped {
        /// The addon is one `.py` file.
        single_file: bool,
        /// The archive is not in canonical shape.
        needs_repackaging: bool,
        /// Entry holding `bl_info`.
        entry: String,
    },
    /// Directory. `entry` is the metadata file relative to it.
    Directory {
        /// The directory only wraps one `.py` file.
        single_file: bool,
        /// File holding `bl_info`.
        entry: String,
    },
    /// Lone `.py` file.
    SingleFile,
    /// Dev package directory.
    DevDirectory,
    /// Dev `.py` file.
    DevSingleFile,
}

impl AddonVariant {
    /// Returns true for dev variants.
    #[must_use]
    pub fn is_dev(&self) -> bool {
        matches!(self, Self::DevDirectory | Self::DevSingleFile)
    }

    /// Returns true if the addon is a single `.py` file.
    #[must_use]
    pub fn is_single_file(&self) -> bool {
        match self {
            Self::Zipped { single_file, .. } | Self::Directory { single_file, .. } => *single_file,
            Self::SingleFile | Self::DevSingleFile => true,
            Self::DevDirectory => false,
        }
    }

    /// Returns true if storing requires rebuilding the archive.
    #[must_use]
    pub fn needs_repackaging(&self) -> bool {
        match self {
            Self::Zipped {
                needs_repackaging, ..
            } => *needs_repackaging,
            _ => false,
        }
    }

    /// Shape tag.
    #[must_use]
    pub fn shape(&self) -> AddonShape {
        match self {
            Self::Zipped {
                single_file: true, ..
            } => AddonShape::ZippedSingleFile,
            Self::Zipped { entry, .. } if archive::depth(entry) == 0 => AddonShape::ZippedTopLevel,
            Self::Zipped { .. } => AddonShape::ZippedNested,
            Self::Directory {
                single_file: true, ..
            } => AddonShape::DirectorySingleFile,
            Self::Directory { .. } => AddonShape::Directory,
            Self::SingleFile => AddonShape::SingleFile,
            Self::DevDirectory => AddonShape::DevDirectory,
            Self::DevSingleFile => AddonShape::DevSingleFile,
        }
    }
}

/// Directory name an addon deploys to: sanitised, lowercase name.
#[must_use]
pub fn deployed_dir_name_for(name: &str) -> String {
    fsops::sanitize_name(name).to_lowercase()
}

/// A Blender addon.
///
/// Equality and hashing use `name|version` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    core: ComponentCore,
    info: AddonInfo,
    variant: AddonVariant,
    file_name: String,
}

impl Addon {
    pub(crate) fn assemble(
        info: AddonInfo,
        variant: AddonVariant,
        file_name: String,
        path: &Path,
        repo_root: Option<&Path>,
    ) -> Self {
        let capabilities = if variant.is_dev() {
            Capabilities::DEV
        } else {
            Capabilities::RELEASED
        };
        let mut core = ComponentCore::new(info.name.clone(), capabilities);
        core.bind(path, repo_root);
        Self {
            core,
            info,
            variant,
            file_name,
        }
    }

    /// Detects a released addon. See [`detect`].
    ///
    /// # Errors
    /// Returns `AddonInfoNotFound` for unrecognised paths.
    pub fn from_path(path: &Path, repo_root: Option<&Path>) -> Result<Self> {
        detect(path, repo_root)
    }

    /// Detects a dev addon. See [`detect_dev`].
    ///
    /// # Errors
    /// Returns `AddonInfoNotFound` for unrecognised paths.
    pub fn dev_from_path(path: &Path) -> Result<Self> {
        detect_dev(path)
    }

    /// Parsed metadata.
    #[must_use]
    pub fn info(&self) -> &AddonInfo {
        &self.info
    }

    /// Addon name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Addon version.
    #[must_use]
    pub fn version(&self) -> &LooseVersion {
        &self.info.version
    }

    /// Current packaging.
    #[must_use]
    pub fn variant(&self) -> &AddonVariant {
        &self.variant
    }

    /// Shape tag.
    #[must_use]
    pub fn shape(&self) -> AddonShape {
        self.variant.shape()
    }

    /// Returns true for dev addons.
    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.variant.is_dev()
    }

    /// `"{name} {version}"`.
    #[must_use]
    pub fn repo_display_name(&self) -> String {
        format!("{} {}", self.info.name, self.info.version)
    }

    /// `"{name}_{version}.zip"` with a sanitised lowercase name.
    #[must_use]
    pub fn repo_archive_name(&self) -> String {
        format!("{}_{}.zip", self.deployed_dir_name(), self.info.version)
    }

    /// Directory name used for package-shaped addons.
    #[must_use]
    pub fn deployed_dir_name(&self) -> String {
        deployed_dir_name_for(&self.info.name)
    }

    /// Original file name of a single-file addon.
    #[must_use]
    pub fn deployed_file_name(&self) -> &str {
        &self.file_name
    }

    /// Name of the deployed top-level entry.
    #[must_use]
    pub fn deployed_name(&self) -> String {
        if self.variant.is_single_file() {
            self.file_name.clone()
        } else {
            self.deployed_dir_name()
        }
    }

    fn zip_layout(&self) -> Option<Layout> {
        match &self.variant {
            AddonVariant::Zipped {
                single_file: true,
                entry,
                ..
            } => Some(Layout::SingleFile {
                entry: entry.clone(),
                file_name: self.file_name.clone(),
            }),
            AddonVariant::Zipped { entry, .. } => Some(Layout::Wrapped {
                strip_prefix: entry.trim_end_matches(INIT_FILE).to_string(),
                wrapper: self.deployed_dir_name(),
            }),
            _ => None,
        }
    }

    /// Writes the canonical archive for the current data into `destination`
    /// and returns the metadata entry inside it.
    fn write_canonical_archive(&self, source: &Path, destination: &Path) -> Result<String> {
        let dir_name = self.deployed_dir_name();
        match &self.variant {
            AddonVariant::Zipped { .. } => {
                let layout = self.zip_layout().ok_or_else(|| {
                    DepotError::Consistency(format!("{} has no archive layout", self.name()))
                })?;
                if archive::is_canonical(source, &layout)? {
                    fs::copy(source, destination).at("Error copying", source)?;
                } else {
                    archive::repack(source, &layout, destination)?;
                }
                Ok(match layout {
                    Layout::SingleFile { file_name, .. } => file_name,
                    Layout::Wrapped { wrapper, .. } => format!("{}/{}", wrapper, INIT_FILE),
                })
            }
            AddonVariant::Directory {
                single_file: true,
                entry,
            } => {
                archive::zip_file(&source.join(entry), &self.file_name, destination)?;
                Ok(self.file_name.clone())
            }
            AddonVariant::Directory { .. } => {
                archive::zip_directory(source, &dir_name, destination)?;
                Ok(format!("{}/{}", dir_name, INIT_FILE))
            }
            AddonVariant::SingleFile => {
                archive::zip_file(source, &self.file_name, destination)?;
                Ok(self.file_name.clone())
            }
            AddonVariant::DevDirectory | AddonVariant::DevSingleFile => {
                Err(DepotError::NotAllowed {
                    operation: "Storing in the repository".to_string(),
                    component: self.repo_display_name(),
                })
            }
        }
    }
}

impl PartialEq for Addon {
    fn eq(&self, other: &Self) -> bool {
        self.info.name == other.info.name && self.info.version == other.info.version
    }
}

impl Eq for Addon {}

impl Hash for Addon {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl Entity for Addon {
    fn kind(&self) -> ComponentKind {
        if self.is_dev() {
            ComponentKind::DevAddon
        } else {
            ComponentKind::ReleasedAddon
        }
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn identity(&self) -> String {
        format!("{}|{}", self.info.name, self.info.version)
    }

    fn display_name(&self) -> String {
        self.repo_display_name()
    }

    fn verify(&self) -> Result<()> {
        self.core.verify_exists()?;
        if let (AddonVariant::Zipped { .. }, Some(path)) = (&self.variant, self.core.data_path()) {
            archive::entry_names(path)?;
        }
        Ok(())
    }

    /// Stores the addon as `Addons/<repo_archive_name>`.
    fn store_in_repo(&mut self, target: &StorageTarget, delete_existing: bool) -> Result<()> {
        let source = self.core.check_storable(&target.repo_root)?.to_path_buf();
        let destination = target.data_dir.join(self.repo_archive_name());
        fsops::ready_target_path(&destination, delete_existing)?;

        let entry = match self.write_canonical_archive(&source, &destination) {
            Ok(entry) => entry,
            Err(e) => {
                if let Err(cleanup) = fsops::remove_target_path(&destination) {
                    tracing::warn!(
                        "Could not remove partial archive {}: {}",
                        destination.display(),
                        cleanup
                    );
                }
                return Err(e);
            }
        };

        self.core.commit_stored(&destination, &target.repo_root)?;
        self.variant = AddonVariant::Zipped {
            single_file: self.variant.is_single_file(),
            needs_repackaging: false,
            entry,
        };
        tracing::info!(
            "Stored addon {} at {}",
            self.repo_display_name(),
            destination.display()
        );
        Ok(())
    }
}

impl Deployable for Addon {
    fn deploy(&self, target_dir: &Path, delete_existing: bool) -> Result<PathBuf> {
        let source = self.core.require_data_path()?;

        let deployed = match &self.variant {
            AddonVariant::DevDirectory | AddonVariant::DevSingleFile => {
                let link = target_dir.join(self.deployed_name());
                fsops::ready_target_path(&link, delete_existing)?;
                fsops::create_symlink(source, &link)?;
                link
            }
            AddonVariant::Zipped { .. } if self.core.is_stored_in_repo() => {
                let top = archive::top_level_entry(source)?;
                let deployed = target_dir.join(top);
                fsops::ready_target_path(&deployed, delete_existing)?;
                archive::extract(source, target_dir, None)?;
                deployed
            }
            AddonVariant::Zipped { .. } => {
                let layout = self.zip_layout().ok_or_else(|| {
                    DepotError::Consistency(format!("{} has no archive layout", self.name()))
                })?;
                let deployed = target_dir.join(layout.top_level());
                fsops::ready_target_path(&deployed, delete_existing)?;
                archive::extract(source, target_dir, Some(&layout))?;
                deployed
            }
            AddonVariant::Directory {
                single_file: true,
                entry,
            } => {
                let deployed = target_dir.join(&self.file_name);
                fsops::ready_target_path(&deployed, delete_existing)?;
                fsops::copy_path(&source.join(entry), &deployed)?;
                deployed
            }
            AddonVariant::Directory { .. } => {
                let deployed = target_dir.join(self.deployed_dir_name());
                fsops::ready_target_path(&deployed, delete_existing)?;
                fsops::copy_dir_recursive(source, &deployed)?;
                deployed
            }
            AddonVariant::SingleFile => {
                let deployed = target_dir.join(&self.file_name);
                fsops::ready_target_path(&deployed, delete_existing)?;
                fsops::copy_path(source, &deployed)?;
                deployed
            }
        };

        tracing::info!(
            "Deployed {} to {}",
            self.repo_display_name(),
            deployed.display()
        );
        Ok(deployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, version: &str) -> AddonInfo {
        AddonInfo {
            name: name.to_string(),
            version: LooseVersion::parse(version).unwrap(),
            blender_version_min: None,
            description: None,
        }
    }

    #[test]
    fn test_canonical_names() {
        let addon = Addon::assemble(
            info("Node Wrangler", "3.45.0"),
            AddonVariant::SingleFile,
            "node_wrangler.py".into(),
            Path::new("/tmp/node_wrangler.py"),
            None,
        );
        assert_eq!(addon.repo_display_name(), "Node Wrangler 3.45.0");
        assert_eq!(addon.repo_archive_name(), "node_wrangler_3.45.0.zip");
        assert_eq!(addon.deployed_dir_name(), "node_wrangler");
        assert_eq!(addon.deployed_name(), "node_wrangler.py");
        assert_eq!(addon.kind(), ComponentKind::ReleasedAddon);
    }

    #[test]
    fn test_dev_addon_cannot_be_stored() {
        let repo = tempfile::tempdir().unwrap();
        let src = tempfile::tempdir().unwrap();
        let mut addon = Addon::assemble(
            info("Foo", "1.0.0"),
            AddonVariant::DevDirectory,
            INIT_FILE.into(),
            src.path(),
            None,
        );
        assert_eq!(addon.kind(), ComponentKind::DevAddon);
        let err = addon
            .store_in_repo(&StorageTarget::new(repo.path(), "Addons"), false)
            .unwrap_err();
        assert!(matches!(err, DepotError::NotAllowed { .. }));
        assert!(!addon.core().is_stored_in_repo());
    }

    #[test]
    fn test_equality_ignores_origin() {
        let a = Addon::assemble(
            info("Foo", "1.0.0"),
            AddonVariant::SingleFile,
            "foo.py".into(),
            Path::new("/a/foo.py"),
            None,
        );
        let b = Addon::assemble(
            info("Foo", "1.0.0"),
            AddonVariant::DevSingleFile,
            "other.py".into(),
            Path::new("/b/other.py"),
            None,
        );
        let c = Addon::assemble(
            info("Foo", "1.0.1"),
            AddonVariant::SingleFile,
            "foo.py".into(),
            Path::new("/a/foo.py"),
            None,
        );
        assert_eq!(a, b);
        assert_eq!(a.stable_hash(), b.stable_hash());
        assert_ne!(a, c);
    }

    #[test]
    fn test_variant_flags() {
        let zipped = AddonVariant::Zipped {
            single_file: false,
            needs_repackaging: true,
            entry: INIT_FILE.into(),
        };
        assert_eq!(zipped.shape(), AddonShape::ZippedTopLevel);
        assert!(zipped.needs_repackaging());
        assert!(!zipped.is_single_file());

        let nested = AddonVariant::Zipped {
            single_file: false,
            needs_repackaging: false,
            entry: "pkg/__init__.py".into(),
        };
        assert_eq!(nested.shape(), AddonShape::ZippedNested);
        assert!(AddonVariant::DevSingleFile.is_single_file());
        assert!(AddonVariant::DevDirectory.is_dev());
    }
}
