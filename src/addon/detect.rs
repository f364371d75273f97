//! Addon shape detection.
//!
//! Released detection accepts six shapes. Dev detection is a separate entry
//! point and is never attempted automatically.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::archive::{self, Layout};
use super::metadata::AddonInfo;
use super::{Addon, AddonVariant};
use crate::error::{DepotError, IoContext, Result};

/// Package initializer file name.
pub const INIT_FILE: &str = "__init__.py";

/// Detected packaging shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddonShape {
    /// Archive holding exactly one non-initializer `.py` file.
    ZippedSingleFile,
    /// Archive with the package initializer at the archive root.
    ZippedTopLevel,
    /// Archive with the initializer one directory down.
    ZippedNested,
    /// Lone `.py` file carrying metadata.
    SingleFile,
    /// Directory containing a single non-initializer `.py` file.
    DirectorySingleFile,
    /// Package directory with an initializer.
    Directory,
    /// Dev package directory, linked at deploy time.
    DevDirectory,
    /// Dev single file, linked at deploy time.
    DevSingleFile,
}

impl AddonShape {
    /// Returns true for the two dev shapes.
    #[must_use]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::DevDirectory | Self::DevSingleFile)
    }
}

impl fmt::Display for AddonShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ZippedSingleFile => "zipped single-file addon",
            Self::ZippedTopLevel => "zipped addon (unwrapped)",
            Self::ZippedNested => "zipped addon",
            Self::SingleFile => "single-file addon",
            Self::DirectorySingleFile => "single-file addon (directory)",
            Self::Directory => "directory addon",
            Self::DevDirectory => "dev directory addon",
            Self::DevSingleFile => "dev single-file addon",
        };
        f.write_str(label)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn is_python_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("py"))
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(DepotError::PathNotFound(path.to_path_buf()));
    }
    std::path::absolute(path).at("Error resolving", path)
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DepotError::InvalidName(path.display().to_string()))
}

fn info_from_file(path: &Path, reported: &Path) -> Result<AddonInfo> {
    AddonInfo::from_file(path).ok_or_else(|| DepotError::AddonInfoNotFound(reported.to_path_buf()))
}

/// Detects a released addon at `path`.
///
/// `repo_root` is used to recognise data that already lives in a repository.
///
/// # Errors
/// Returns `AddonInfoNotFound` when no shape matches or metadata is missing.
pub fn detect(path: &Path, repo_root: Option<&Path>) -> Result<Addon> {
    let path = absolute(path)?;
    let (info, variant, file_name) = if path.is_file() && has_extension(&path, "zip") {
        detect_zipped(&path)?
    } else if path.is_file() && has_extension(&path, "py") {
        let info = info_from_file(&path, &path)?;
        (info, AddonVariant::SingleFile, file_name_of(&path)?)
    } else if path.is_dir() {
        detect_directory(&path)?
    } else {
        return Err(DepotError::AddonInfoNotFound(path));
    };

    tracing::debug!("Detected {} at {}", variant.shape(), path.display());
    Ok(Addon::assemble(info, variant, file_name, &path, repo_root))
}

fn detect_zipped(path: &Path) -> Result<(AddonInfo, AddonVariant, String)> {
    let names = archive::entry_names(path)?;
    let files: Vec<&String> = names.iter().filter(|n| !archive::is_dir_entry(n)).collect();

    if let [only] = files.as_slice() {
        let base = archive::base_name(only);
        if is_python_file_name(base) && base != INIT_FILE {
            let text = archive::read_entry_text(path, only)?;
            let info =
                AddonInfo::parse(&text).ok_or_else(|| DepotError::AddonInfoNotFound(path.into()))?;
            let variant = AddonVariant::Zipped {
                single_file: true,
                needs_repackaging: archive::depth(only) != 0,
                entry: (*only).clone(),
            };
            return Ok((info, variant, base.to_string()));
        }
    }

    let inits_at = |depth: usize| -> Vec<&String> {
        files
            .iter()
            .filter(|n| archive::base_name(n) == INIT_FILE && archive::depth(n) == depth)
            .copied()
            .collect()
    };
    let entry = match (inits_at(0).as_slice(), inits_at(1).as_slice()) {
        ([top], _) => (*top).clone(),
        ([], [nested]) => (*nested).clone(),
        _ => return Err(DepotError::AddonInfoNotFound(path.to_path_buf())),
    };

    let text = archive::read_entry_text(path, &entry)?;
    let info = AddonInfo::parse(&text).ok_or_else(|| DepotError::AddonInfoNotFound(path.into()))?;
    let layout = Layout::Wrapped {
        strip_prefix: entry.trim_end_matches(INIT_FILE).to_string(),
        wrapper: super::deployed_dir_name_for(&info.name),
    };
    let variant = AddonVariant::Zipped {
        single_file: false,
        needs_repackaging: !archive::is_canonical(path, &layout)?,
        entry,
    };
    Ok((info, variant, INIT_FILE.to_string()))
}

fn visible_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).at("Error reading", dir)? {
        let path = entry.at("Error reading", dir)?.path();
        if path.file_name().is_some_and(|n| n == "__pycache__") {
            continue;
        }
        entries.push(path);
    }
    Ok(entries)
}

fn detect_directory(path: &Path) -> Result<(AddonInfo, AddonVariant, String)> {
    let entries = visible_entries(path)?;

    if let [only] = entries.as_slice() {
        let name = file_name_of(only)?;
        if only.is_file() && is_python_file_name(&name) && name != INIT_FILE {
            let info = info_from_file(only, path)?;
            let variant = AddonVariant::Directory {
                single_file: true,
                entry: name.clone(),
            };
            return Ok((info, variant, name));
        }
    }

    let init = path.join(INIT_FILE);
    if init.is_file() {
        let info = info_from_file(&init, path)?;
        let variant = AddonVariant::Directory {
            single_file: false,
            entry: INIT_FILE.to_string(),
        };
        return Ok((info, variant, INIT_FILE.to_string()));
    }

    Err(DepotError::AddonInfoNotFound(path.to_path_buf()))
}

/// Detects a dev addon at `path`: a package directory or a single `.py` file.
///
/// # Errors
/// Returns `AddonInfoNotFound` when the path is neither or lacks metadata.
pub fn detect_dev(path: &Path) -> Result<Addon> {
    let path = absolute(path)?;
    let (info, variant, file_name) = if path.is_dir() {
        let info = info_from_file(&path.join(INIT_FILE), &path)?;
        (info, AddonVariant::DevDirectory, INIT_FILE.to_string())
    } else if path.is_file() && has_extension(&path, "py") {
        let info = info_from_file(&path, &path)?;
        (info, AddonVariant::DevSingleFile, file_name_of(&path)?)
    } else {
        return Err(DepotError::AddonInfoNotFound(path));
    };

    tracing::debug!("Detected {} at {}", variant.shape(), path.display());
    Ok(Addon::assemble(info, variant, file_name, &path, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "bl_info = {\"name\": \"Foo\", \"version\": (1, 0, 0)}\n";

    #[test]
    fn test_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = detect(&dir.path().join("nope.zip"), None).unwrap_err();
        assert!(matches!(err, DepotError::PathNotFound(_)));
    }

    #[test]
    fn test_directory_shapes() {
        let dir = tempfile::tempdir().unwrap();

        let pkg = dir.path().join("pkg");
        fs::create_dir_all(pkg.join("__pycache__")).unwrap();
        fs::write(pkg.join(INIT_FILE), INFO).unwrap();
        fs::write(pkg.join("ops.py"), "").unwrap();
        assert_eq!(detect(&pkg, None).unwrap().shape(), AddonShape::Directory);

        let holder = dir.path().join("holder");
        fs::create_dir_all(holder.join("__pycache__")).unwrap();
        fs::write(holder.join("tool.py"), INFO).unwrap();
        let addon = detect(&holder, None).unwrap();
        assert_eq!(addon.shape(), AddonShape::DirectorySingleFile);
        assert_eq!(addon.deployed_file_name(), "tool.py");

        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert!(matches!(
            detect(&empty, None),
            Err(DepotError::AddonInfoNotFound(_))
        ));
    }

    #[test]
    fn test_python_file_without_info() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.py");
        fs::write(&file, "print('hello')").unwrap();
        assert!(matches!(
            detect(&file, None),
            Err(DepotError::AddonInfoNotFound(_))
        ));
    }

    #[test]
    fn test_dev_detection() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join(INIT_FILE), INFO).unwrap();
        assert_eq!(detect_dev(&pkg).unwrap().shape(), AddonShape::DevDirectory);

        let file = dir.path().join("tool.py");
        fs::write(&file, INFO).unwrap();
        assert_eq!(detect_dev(&file).unwrap().shape(), AddonShape::DevSingleFile);

        let no_init = dir.path().join("no_init");
        fs::create_dir_all(&no_init).unwrap();
        assert!(detect_dev(&no_init).is_err());
    }
}
