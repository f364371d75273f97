//! File-system helpers shared by components.
//!
//! None of these are transactional: a failure after [`ready_target_path`]
//! can leave the target partially created.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{DepotError, IoContext, Result};

#[allow(clippy::expect_used)]
static VALID_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]*$").expect("name pattern compiles"));

/// Returns true if `name` may be used as a single path segment.
///
/// Only ASCII letters, digits, `_`, `.` and `-` are allowed, and the name must
/// not be empty or made only of dots.
#[must_use]
pub fn is_valid_name_for_path(name: &str) -> bool {
    !name.is_empty() && !name.chars().all(|c| c == '.') && VALID_NAME.is_match(name)
}

/// Returns an error unless `name` is a valid path segment.
///
/// # Errors
/// Returns `InvalidName` otherwise.
pub fn validate_name(name: &str) -> Result<()> {
    if is_valid_name_for_path(name) {
        Ok(())
    } else {
        Err(DepotError::InvalidName(name.to_string()))
    }
}

/// Replaces characters outside `[A-Za-z0-9_.-]` with `_`.
#[must_use]
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

/// Returns true if `path` is inside `root` (lexically, after normalising).
#[must_use]
pub fn is_under(path: &Path, root: &Path) -> bool {
    normalize(path).starts_with(normalize(root))
}

/// Removes `.` and resolves `..` segments without touching the disk.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns true if something (including a dangling symlink) exists at `path`.
#[must_use]
pub fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Creates `path` and its parents.
///
/// # Errors
/// Returns an I/O error carrying the path.
pub fn create_target_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).at("Error creating directory", path)
}

/// Removes whatever is at `path`.
///
/// Symlinks (to files or directories) are unlinked without following them.
/// A missing path is not an error.
///
/// # Errors
/// Returns an I/O error carrying the path.
pub fn remove_target_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(DepotError::io("Error removing", path, e)),
    };

    let result = if meta.file_type().is_symlink() {
        remove_symlink(path)
    } else if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.at("Error removing", path)?;
    tracing::debug!("Removed {}", path.display());
    Ok(())
}

#[cfg(windows)]
fn remove_symlink(path: &Path) -> io::Result<()> {
    // Directory symlinks and junctions need remove_dir on Windows.
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}

#[cfg(not(windows))]
fn remove_symlink(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

/// Prepares `path` to be written.
///
/// Existing entries are removed when `delete_existing` is set and otherwise
/// fail with `AlreadyExists`. The parent directory is created.
///
/// # Errors
/// Returns `AlreadyExists` or an I/O error.
pub fn ready_target_path(path: &Path, delete_existing: bool) -> Result<()> {
    if entry_exists(path) {
        if !delete_existing {
            return Err(DepotError::AlreadyExists(path.to_path_buf()));
        }
        remove_target_path(path)?;
    }
    if let Some(parent) = path.parent() {
        create_target_dir(parent)?;
    }
    Ok(())
}

/// Recursively copies a directory, following symlinks.
///
/// # Errors
/// Returns an I/O error carrying the failing path.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    create_target_dir(dst)?;

    for entry in fs::read_dir(src).at("Error reading", src)? {
        let entry = entry.at("Error reading", src)?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).at("Error copying", &src_path)?;
        }
    }

    Ok(())
}

/// Recursively copies a directory, recreating symlinks instead of following them.
///
/// # Errors
/// Returns an I/O error carrying the failing path, or `SymlinkDenied`.
pub fn copy_dir_preserving_symlinks(src: &Path, dst: &Path) -> Result<()> {
    create_target_dir(dst)?;

    for entry in fs::read_dir(src).at("Error reading", src)? {
        let entry = entry.at("Error reading", src)?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().at("Error reading", &src_path)?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src_path).at("Error reading link", &src_path)?;
            create_symlink(&target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_preserving_symlinks(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).at("Error copying", &src_path)?;
        }
    }

    Ok(())
}

/// Copies a file or directory from `src` to `dst`.
///
/// # Errors
/// Returns an I/O error carrying the failing path.
pub fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir_recursive(src, dst)
    } else {
        fs::copy(src, dst).at("Error copying", src).map(|_| ())
    }
}

/// Creates a symlink at `link` pointing to `target`.
///
/// # Errors
/// Permission failures map to `SymlinkDenied`; other failures to I/O errors.
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    match symlink(target, link) {
        Ok(()) => {
            tracing::debug!("Linked {} -> {}", link.display(), target.display());
            Ok(())
        }
        Err(e) if is_symlink_denied(&e) => Err(DepotError::SymlinkDenied {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            source: e,
        }),
        Err(e) => Err(DepotError::io("Error creating symlink", link, e)),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(not(any(unix, windows)))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

fn is_symlink_denied(e: &io::Error) -> bool {
    // ERROR_PRIVILEGE_NOT_HELD
    const WINDOWS_PRIVILEGE_NOT_HELD: i32 = 1314;
    matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    ) || (cfg!(windows) && e.raw_os_error() == Some(WINDOWS_PRIVILEGE_NOT_HELD))
}

/// Renders a path with forward slashes, as Python `.pth` files expect.
#[must_use]
pub fn to_posix_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name_for_path() {
        assert!(is_valid_name_for_path("my_setup-1.0"));
        assert!(!is_valid_name_for_path("my setup"));
        assert!(!is_valid_name_for_path("a/b"));
        assert!(!is_valid_name_for_path(""));
        assert!(!is_valid_name_for_path(".."));
        assert!(validate_name("bad:name").is_err());
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("Node Wrangler"), "Node_Wrangler");
        assert_eq!(sanitize_name("a/b:c"), "a_b_c");
        assert_eq!(sanitize_name(".."), "_..");
        assert!(is_valid_name_for_path(&sanitize_name("Über Tool!")));
    }

    #[test]
    fn test_is_under() {
        assert!(is_under(Path::new("/repo/Addons/a.zip"), Path::new("/repo")));
        assert!(is_under(Path::new("/repo/x/../a.zip"), Path::new("/repo")));
        assert!(!is_under(Path::new("/repo/../other"), Path::new("/repo")));
        assert!(!is_under(Path::new("/repository"), Path::new("/repo")));
    }

    #[test]
    fn test_ready_target_path() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub").join("file.txt");

        ready_target_path(&target, false).unwrap();
        assert!(target.parent().unwrap().is_dir());

        fs::write(&target, "x").unwrap();
        let err = ready_target_path(&target, false).unwrap_err();
        assert!(err.is_already_exists());

        ready_target_path(&target, true).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/c.txt"), "hello").unwrap();
        fs::write(src.path().join("top.txt"), "top").unwrap();

        let out = dst.path().join("copy");
        copy_dir_recursive(src.path(), &out).unwrap();
        assert_eq!(fs::read_to_string(out.join("a/b/c.txt")).unwrap(), "hello");
        assert_eq!(fs::read_to_string(out.join("top.txt")).unwrap(), "top");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_roundtrip_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "keep").unwrap();

        let link = dir.path().join("link");
        create_symlink(&target, &link).unwrap();
        assert!(link.join("keep.txt").exists());

        remove_target_path(&link).unwrap();
        assert!(!entry_exists(&link));
        assert!(target.join("keep.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserving_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&outside).unwrap();
        create_symlink(&outside, &src.join("linked")).unwrap();

        let dst = dir.path().join("dst");
        copy_dir_preserving_symlinks(&src, &dst).unwrap();
        let meta = fs::symlink_metadata(dst.join("linked")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(dst.join("linked")).unwrap(), outside);
    }

    #[test]
    fn test_to_posix_string() {
        assert_eq!(to_posix_string(Path::new("a\\b\\c")), "a/b/c");
    }
}
