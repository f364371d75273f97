//! Platform detection and per-OS conventions.
//!
//! Components record the platform they were created on; program-bound
//! entities refuse to verify on another one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Cached current platform.
static CURRENT: OnceLock<Platform> = OnceLock::new();

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Microsoft Windows.
    Windows,
    /// Linux.
    Linux,
    /// macOS.
    Macos,
    /// Anything else.
    Other,
}

impl Platform {
    /// Returns the platform this process runs on.
    #[must_use]
    pub fn current() -> Self {
        *CURRENT.get_or_init(|| Self::from_os(std::env::consts::OS))
    }

    /// Maps a `std::env::consts::OS` value.
    #[must_use]
    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "macos" => Self::Macos,
            _ => Self::Other,
        }
    }

    /// Name of the Blender executable inside an install directory.
    #[must_use]
    pub fn blender_exe_name(self) -> &'static str {
        match self {
            Self::Windows => "blender.exe",
            Self::Macos => "Blender",
            Self::Linux | Self::Other => "blender",
        }
    }

    /// Derives the Blender executable from the base interpreter a venv was
    /// created from.
    ///
    /// Blender bundles its interpreter at
    /// `<install>/<X.Y>/python/bin/python[.exe]`, and on macOS at
    /// `Blender.app/Contents/Resources/<X.Y>/python/bin/python3.x`.
    #[must_use]
    pub fn blender_exe_from_base_python(self, base_python: &Path) -> Option<PathBuf> {
        match self {
            Self::Macos => {
                let contents = base_python.ancestors().nth(5)?;
                Some(contents.join("MacOS").join(self.blender_exe_name()))
            }
            _ => {
                let install = base_python.ancestors().nth(4)?;
                Some(install.join(self.blender_exe_name()))
            }
        }
    }

    /// Directory holding venv executables (`Scripts` or `bin`).
    #[must_use]
    pub fn venv_bin_dir(self) -> &'static str {
        match self {
            Self::Windows => "Scripts",
            _ => "bin",
        }
    }

    /// Python executable file name inside a venv.
    #[must_use]
    pub fn venv_python_name(self) -> &'static str {
        match self {
            Self::Windows => "python.exe",
            _ => "python",
        }
    }

    /// Library root inside a venv, relative to the venv directory.
    ///
    /// `python_minor` is the "X.Y" interpreter version used on POSIX layouts.
    #[must_use]
    pub fn venv_lib_dir(self, python_minor: &str) -> PathBuf {
        match self {
            Self::Windows => PathBuf::from("Lib"),
            _ => PathBuf::from("lib").join(format!("python{}", python_minor)),
        }
    }

    /// Interactive shell used to open an activated venv.
    #[must_use]
    pub fn interactive_shell(self) -> (&'static str, Vec<&'static str>) {
        match self {
            Self::Windows => ("cmd", vec!["/c", "start", "cmd", "/k"]),
            Self::Macos => ("zsh", vec!["-i"]),
            Self::Linux | Self::Other => ("bash", vec!["-i"]),
        }
    }

    /// Separator for the `PATH` environment variable.
    #[must_use]
    pub fn path_separator(self) -> char {
        match self {
            Self::Windows => ';',
            _ => ':',
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_cached() {
        assert_eq!(Platform::current(), Platform::current());
        assert_eq!(Platform::current(), Platform::from_os(std::env::consts::OS));
    }

    #[test]
    fn test_blender_exe_from_base_python_windows() {
        let base = Path::new("C:/Blender/4.0/python/bin/python.exe");
        assert_eq!(
            Platform::Windows.blender_exe_from_base_python(base),
            Some(PathBuf::from("C:/Blender/blender.exe"))
        );
    }

    #[test]
    fn test_blender_exe_from_base_python_linux() {
        let base = Path::new("/opt/blender-4.0/4.0/python/bin/python3.10");
        assert_eq!(
            Platform::Linux.blender_exe_from_base_python(base),
            Some(PathBuf::from("/opt/blender-4.0/blender"))
        );
    }

    #[test]
    fn test_blender_exe_from_base_python_macos() {
        let base =
            Path::new("/Applications/Blender.app/Contents/Resources/4.0/python/bin/python3.10");
        assert_eq!(
            Platform::Macos.blender_exe_from_base_python(base),
            Some(PathBuf::from(
                "/Applications/Blender.app/Contents/MacOS/Blender"
            ))
        );
    }

    #[test]
    fn test_short_path_has_no_blender() {
        assert_eq!(
            Platform::Linux.blender_exe_from_base_python(Path::new("python")),
            None
        );
    }

    #[test]
    fn test_venv_layout() {
        assert_eq!(Platform::Windows.venv_lib_dir("3.10"), PathBuf::from("Lib"));
        assert_eq!(
            Platform::Linux.venv_lib_dir("3.10"),
            PathBuf::from("lib/python3.10")
        );
        assert_eq!(Platform::Windows.venv_bin_dir(), "Scripts");
        assert_eq!(Platform::Macos.venv_bin_dir(), "bin");
    }
}
