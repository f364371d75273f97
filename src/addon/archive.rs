//! Zip handling for addon archives.
//!
//! Every released addon ends up as one of two canonical archive shapes: a
//! single `.py` at the archive root, or one top-level directory holding the
//! package. [`Layout`] describes how a source archive maps onto that shape.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

use crate::error::{DepotError, IoContext, Result};

/// How entries of a source archive map onto the canonical shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// Keep only `entry`, stored at the archive root as `file_name`.
    SingleFile {
        /// Entry name in the source archive.
        entry: String,
        /// Name at the archive root.
        file_name: String,
    },
    /// Keep entries under `strip_prefix` and nest them under `wrapper/`.
    ///
    /// An empty prefix wraps the whole archive.
    Wrapped {
        /// Prefix removed from kept entries (`""` or `"dir/"`).
        strip_prefix: String,
        /// Canonical top-level directory.
        wrapper: String,
    },
}

impl Layout {
    /// Maps a source entry name to its canonical name, if kept.
    #[must_use]
    pub fn map_entry(&self, name: &str) -> Option<String> {
        match self {
            Self::SingleFile { entry, file_name } => (name == entry).then(|| file_name.clone()),
            Self::Wrapped {
                strip_prefix,
                wrapper,
            } => {
                let rest = name.strip_prefix(strip_prefix.as_str())?;
                if rest.is_empty() {
                    return None;
                }
                Some(format!("{}/{}", wrapper, rest))
            }
        }
    }

    /// Returns the top-level name the layout produces.
    #[must_use]
    pub fn top_level(&self) -> &str {
        match self {
            Self::SingleFile { file_name, .. } => file_name,
            Self::Wrapped { wrapper, .. } => wrapper,
        }
    }
}

fn open(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).at("Error opening", path)?;
    Ok(ZipArchive::new(file)?)
}

/// Lists entry names, directories included.
///
/// # Errors
/// Returns an error if the archive cannot be opened.
pub fn entry_names(path: &Path) -> Result<Vec<String>> {
    let archive = open(path)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Returns true for directory entries (`name/`).
#[must_use]
pub fn is_dir_entry(name: &str) -> bool {
    name.ends_with('/')
}

/// Nesting depth of a file entry (`a.py` is 0, `pkg/a.py` is 1).
#[must_use]
pub fn depth(name: &str) -> usize {
    name.trim_end_matches('/').matches('/').count()
}

/// Last path segment of an entry name.
#[must_use]
pub fn base_name(name: &str) -> &str {
    name.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(name)
}

/// Reads an entry as text (lossy UTF-8).
///
/// # Errors
/// Returns an error if the archive or entry cannot be read.
pub fn read_entry_text(path: &Path, name: &str) -> Result<String> {
    let mut archive = open(path)?;
    let mut entry = archive.by_name(name)?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).at("Error reading", path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Finds the single top-level entry of an archive.
///
/// That is the only file for a one-file archive at the root, otherwise the
/// root segment shared by every entry.
///
/// # Errors
/// Returns `InvalidArchive` if the archive is empty or has no shared root.
pub fn top_level_entry(path: &Path) -> Result<String> {
    let names = entry_names(path)?;
    let invalid = |reason: &str| DepotError::InvalidArchive {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let files: Vec<&String> = names.iter().filter(|n| !is_dir_entry(n)).collect();
    match files.as_slice() {
        [] => return Err(invalid("archive has no files")),
        [only] if depth(only) == 0 => return Ok((*only).clone()),
        _ => {}
    }

    let mut roots = names
        .iter()
        .map(|n| n.split('/').next().unwrap_or_default())
        .filter(|r| !r.is_empty());
    let first = roots.next().ok_or_else(|| invalid("archive has no entries"))?;
    if roots.all(|r| r == first) && names.iter().any(|n| n.contains('/')) {
        Ok(first.to_string())
    } else {
        Err(invalid("entries do not share a top-level directory"))
    }
}

/// Returns true if applying `layout` to the archive changes nothing.
///
/// The bare top-level directory entry is allowed to be present.
///
/// # Errors
/// Returns an error if the archive cannot be read.
pub fn is_canonical(path: &Path, layout: &Layout) -> Result<bool> {
    let top_dir = format!("{}/", layout.top_level());
    let names = entry_names(path)?;
    Ok(names.iter().all(|name| {
        *name == top_dir || layout.map_entry(name).as_deref() == Some(name.as_str())
    }))
}

fn is_safe_entry_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.starts_with('\\')
        && !name.contains(':')
        && !name.split(['/', '\\']).any(|seg| seg == "..")
}

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated)
}

/// Writes a new archive at `dst` holding the entries of `src` mapped by `layout`.
///
/// # Errors
/// Returns an error if reading or writing fails, or if nothing was kept.
pub fn repack(src: &Path, layout: &Layout, dst: &Path) -> Result<()> {
    let mut archive = open(src)?;
    let out = File::create(dst).at("Error creating", dst)?;
    let mut writer = zip::ZipWriter::new(out);
    let mut kept = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(target) = layout.map_entry(entry.name()) else {
            continue;
        };
        if entry.is_dir() {
            writer.add_directory(target, file_options())?;
        } else {
            writer.start_file(target, file_options())?;
            io::copy(&mut entry, &mut writer).at("Error writing", dst)?;
            kept += 1;
        }
    }
    writer.finish()?;

    if kept == 0 {
        if let Err(e) = fs::remove_file(dst) {
            tracing::warn!("Could not remove empty archive {}: {}", dst.display(), e);
        }
        return Err(DepotError::InvalidArchive {
            path: src.to_path_buf(),
            reason: "no addon files to repackage".to_string(),
        });
    }
    tracing::debug!("Repacked {} into {}", src.display(), dst.display());
    Ok(())
}

/// Zips a directory so that its contents sit under `wrapper/`.
///
/// # Errors
/// Returns an error if reading or writing fails.
pub fn zip_directory(src: &Path, wrapper: &str, dst: &Path) -> Result<()> {
    let out = File::create(dst).at("Error creating", dst)?;
    let mut writer = zip::ZipWriter::new(out);
    writer.add_directory(format!("{}/", wrapper), file_options())?;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            DepotError::io("Error reading", path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| DepotError::Format(e.to_string()))?;
        let name = format!("{}/{}", wrapper, rel.to_string_lossy().replace('\\', "/"));

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{}/", name), file_options())?;
        } else {
            writer.start_file(name, file_options())?;
            let bytes = fs::read(entry.path()).at("Error reading", entry.path())?;
            writer.write_all(&bytes).at("Error writing", dst)?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Zips a single file at the archive root as `file_name`.
///
/// # Errors
/// Returns an error if reading or writing fails.
pub fn zip_file(src: &Path, file_name: &str, dst: &Path) -> Result<()> {
    let bytes = fs::read(src).at("Error reading", src)?;
    let out = File::create(dst).at("Error creating", dst)?;
    let mut writer = zip::ZipWriter::new(out);
    writer.start_file(file_name, file_options())?;
    writer.write_all(&bytes).at("Error writing", dst)?;
    writer.finish()?;
    Ok(())
}

/// Extracts `src` into `dest`, mapping entries through `layout` when given.
///
/// Entries whose names would escape `dest` are skipped.
///
/// # Errors
/// Returns an error if reading or writing fails.
pub fn extract(src: &Path, dest: &Path, layout: Option<&Layout>) -> Result<()> {
    let mut archive = open(src)?;
    fs::create_dir_all(dest).at("Error creating directory", dest)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = match layout {
            Some(layout) => match layout.map_entry(file.name()) {
                Some(name) => name,
                None => continue,
            },
            None => file.name().to_string(),
        };
        if !is_safe_entry_name(&name) {
            tracing::warn!("Skipping unsafe archive entry {}", name);
            continue;
        }

        let outpath = dest.join(&name);
        if file.is_dir() {
            fs::create_dir_all(&outpath).at("Error creating directory", &outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).at("Error creating directory", parent)?;
            }
            let mut outfile = File::create(&outpath).at("Error creating", &outpath)?;
            io::copy(&mut file, &mut outfile).at("Error writing", &outpath)?;
        }
    }
    Ok(())
}
