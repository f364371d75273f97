//! Blender installations.
//!
//! Everything about a program is probed by running the executable: the
//! Blender version banner, the bundled interpreter and its installed packages.

use std::path::{Path, PathBuf};

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::component::{Capabilities, ComponentCore, ComponentKind, Entity};
use crate::config::Platform;
use crate::error::{DepotError, IoContext, Result};
use crate::process::CommandRunner;
use crate::python::PackageSet;
use crate::version;

/// Expression run inside Blender to report its interpreter.
const PYTHON_PROBE_EXPR: &str =
    "import sys; print('interpreter_path:', sys.executable); print('version:', sys.version)";

const INTERPRETER_PREFIX: &str = "interpreter_path:";
const VERSION_PREFIX: &str = "version:";

/// A probed Blender installation.
///
/// Relative paths are relative to the install directory, which is the
/// component's data path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlenderProgram {
    core: ComponentCore,
    blender_exe_relative_path: PathBuf,
    blender_version: Version,
    python_exe_relative_path: PathBuf,
    python_version: Version,
    site_packages_relative_dir: PathBuf,
    python_packages: PackageSet,
}

impl BlenderProgram {
    /// Probes the Blender executable at `blender_exe`.
    ///
    /// Runs `--version`, a background Python expression and `pip freeze`.
    ///
    /// # Errors
    /// Returns `PathNotFound` for a missing executable, `ToolFailed` or
    /// `UnexpectedOutput` when a probe misbehaves, and `Timeout` for hangs.
    pub fn probe(
        blender_exe: &Path,
        runner: &dyn CommandRunner,
        repo_root: Option<&Path>,
    ) -> Result<Self> {
        if !blender_exe.is_file() {
            return Err(DepotError::PathNotFound(blender_exe.to_path_buf()));
        }
        let blender_exe = std::path::absolute(blender_exe).at("Error resolving", blender_exe)?;
        let install_dir = blender_exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| DepotError::Validation(format!("{} has no parent", blender_exe.display())))?;

        let blender_version = probe_blender_version(&blender_exe, runner)?;
        let (python_exe, python_version) = probe_python(&blender_exe, runner)?;
        let site_packages = site_packages_for(&python_exe, &python_version);
        let python_packages = probe_packages(&python_exe, runner)?;

        tracing::info!(
            "Probed Blender {} (Python {}, {} packages) at {}",
            blender_version,
            python_version,
            python_packages.len(),
            blender_exe.display()
        );

        let mut core = ComponentCore::new(format!("Blender {}", blender_version), Capabilities::default());
        core.bind(&install_dir, repo_root);

        Ok(Self {
            core,
            blender_exe_relative_path: relative_or_absolute(&blender_exe, &install_dir),
            blender_version,
            python_exe_relative_path: relative_or_absolute(&python_exe, &install_dir),
            python_version,
            site_packages_relative_dir: relative_or_absolute(&site_packages, &install_dir),
            python_packages,
        })
    }

    /// Install directory.
    #[must_use]
    pub fn install_dir(&self) -> Option<&Path> {
        self.core.data_path()
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        match self.install_dir() {
            Some(dir) => dir.join(relative),
            None => relative.to_path_buf(),
        }
    }

    /// Blender executable.
    #[must_use]
    pub fn blender_exe_path(&self) -> PathBuf {
        self.resolve(&self.blender_exe_relative_path)
    }

    /// Bundled Python interpreter.
    #[must_use]
    pub fn python_exe_path(&self) -> PathBuf {
        self.resolve(&self.python_exe_relative_path)
    }

    /// Bundled site-packages directory.
    #[must_use]
    pub fn site_packages_dir(&self) -> PathBuf {
        self.resolve(&self.site_packages_relative_dir)
    }

    /// Blender version.
    #[must_use]
    pub fn blender_version(&self) -> &Version {
        &self.blender_version
    }

    /// Bundled Python version.
    #[must_use]
    pub fn python_version(&self) -> &Version {
        &self.python_version
    }

    /// "X.Y" form of the Python version.
    #[must_use]
    pub fn python_minor(&self) -> String {
        format!("{}.{}", self.python_version.major, self.python_version.minor)
    }

    /// Packages installed in the bundled interpreter.
    #[must_use]
    pub fn python_packages(&self) -> &PackageSet {
        &self.python_packages
    }

    /// Packages, mutably (for index enrichment).
    pub fn python_packages_mut(&mut self) -> &mut PackageSet {
        &mut self.python_packages
    }

    /// True if `exe` is this program's Blender executable.
    #[must_use]
    pub fn has_exe(&self, exe: &Path) -> bool {
        crate::fsops::normalize(&self.blender_exe_path()) == crate::fsops::normalize(exe)
    }
}

impl Entity for BlenderProgram {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Program
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn identity(&self) -> String {
        crate::fsops::to_posix_string(&crate::fsops::normalize(&self.blender_exe_path()))
    }

    fn verify(&self) -> Result<()> {
        self.core.verify_platform()?;
        let exe = self.blender_exe_path();
        if exe.is_file() {
            Ok(())
        } else {
            Err(DepotError::PathNotFound(exe))
        }
    }
}

fn probe_blender_version(exe: &Path, runner: &dyn CommandRunner) -> Result<Version> {
    let output = runner.run(exe, &["--version"])?.into_success(exe)?;
    parse_version_banner(&output.stdout).ok_or_else(|| DepotError::UnexpectedOutput {
        program: exe.display().to_string(),
        expected: "Blender <version>".to_string(),
        output: output.stdout,
    })
}

fn probe_python(exe: &Path, runner: &dyn CommandRunner) -> Result<(PathBuf, Version)> {
    let args = [
        "--background",
        "--python-expr",
        PYTHON_PROBE_EXPR,
        "--factory-startup",
        "--python-exit-code",
        "1",
    ];
    let output = runner.run(exe, &args)?.into_success(exe)?;
    parse_python_report(&output.stdout).ok_or_else(|| DepotError::UnexpectedOutput {
        program: exe.display().to_string(),
        expected: format!("{} and {} lines", INTERPRETER_PREFIX, VERSION_PREFIX),
        output: output.stdout,
    })
}

fn probe_packages(python: &Path, runner: &dyn CommandRunner) -> Result<PackageSet> {
    let output = runner
        .run(python, &["-m", "pip", "freeze"])?
        .into_success(python)?;
    Ok(PackageSet::from_freeze_text(&output.stdout))
}

/// Parses the first line of `blender --version` ("Blender 4.1.0").
pub(crate) fn parse_version_banner(stdout: &str) -> Option<Version> {
    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let rest = first.strip_prefix("Blender")?;
    version::parse_lenient(rest.trim())
}

/// Extracts the interpreter path and version printed by the probe expression.
pub(crate) fn parse_python_report(stdout: &str) -> Option<(PathBuf, Version)> {
    let mut path = None;
    let mut python_version = None;
    for line in stdout.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix(INTERPRETER_PREFIX) {
            path = Some(PathBuf::from(rest.trim()));
        } else if let Some(rest) = line.strip_prefix(VERSION_PREFIX) {
            python_version = version::parse_lenient(rest.trim());
        }
    }
    Some((path.filter(|p| !p.as_os_str().is_empty())?, python_version?))
}

/// Bundled site-packages: `<python>/lib/site-packages` on Windows,
/// `<python>/lib/pythonX.Y/site-packages` elsewhere.
fn site_packages_for(python_exe: &Path, python_version: &Version) -> PathBuf {
    let python_root = python_exe
        .parent()
        .and_then(Path::parent)
        .unwrap_or(python_exe);
    let minor = format!("{}.{}", python_version.major, python_version.minor);
    python_root
        .join(Platform::current().venv_lib_dir(&minor))
        .join("site-packages")
}

fn relative_or_absolute(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map_or_else(|_| path.to_path_buf(), Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use std::fs;

    struct ScriptedRunner {
        python: PathBuf,
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, _program: &Path, args: &[&str]) -> Result<CommandOutput> {
            let stdout = match args.first().copied() {
                Some("--version") => "Blender 4.1.0\n\tbuild date: 2024-03-25\n".to_string(),
                Some("--background") => format!(
                    "Blender quit\ninterpreter_path: {}\nversion: 3.11.7 (main, Jan 29 2024)\n",
                    self.python.display()
                ),
                _ => "numpy==1.24.3\nrequests==2.31.0\n".to_string(),
            };
            Ok(CommandOutput {
                status: Some(0),
                stdout,
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn test_parse_version_banner() {
        assert_eq!(
            parse_version_banner("Blender 4.1.0\nbuild hash: abc\n"),
            Some(Version::new(4, 1, 0))
        );
        assert_eq!(parse_version_banner("Blender 3.6.5 LTS"), Some(Version::new(3, 6, 5)));
        assert!(parse_version_banner("Python 3.11").is_none());
        assert!(parse_version_banner("").is_none());
    }

    #[test]
    fn test_parse_python_report() {
        let (path, version) = parse_python_report(
            "noise\ninterpreter_path: C:\\Program Files\\Blender\\4.1\\python\\bin\\python.exe\n\
             version: 3.11.7 (main)\n",
        )
        .unwrap();
        assert_eq!(path, PathBuf::from("C:\\Program Files\\Blender\\4.1\\python\\bin\\python.exe"));
        assert_eq!(version, Version::new(3, 11, 7));
        assert!(parse_python_report("version: 3.11.7").is_none());
    }

    #[test]
    fn test_probe_with_scripted_runner() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join(Platform::current().blender_exe_name());
        fs::write(&exe, "").unwrap();
        let python = dir.path().join("4.1").join("python").join("bin").join("python");

        let program = BlenderProgram::probe(&exe, &ScriptedRunner { python }, None).unwrap();
        assert_eq!(program.blender_version(), &Version::new(4, 1, 0));
        assert_eq!(program.python_minor(), "3.11");
        assert_eq!(program.python_packages().len(), 2);
        assert!(program.has_exe(&exe));
        assert!(program.site_packages_dir().ends_with("site-packages"));
        assert!(program.site_packages_dir().starts_with(dir.path().join("4.1").join("python")));
        assert_eq!(program.display_name(), "Blender 4.1.0");
        assert!(program.verify().is_ok());
    }

    #[test]
    fn test_probe_missing_exe() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner {
            python: PathBuf::from("python"),
        };
        assert!(matches!(
            BlenderProgram::probe(&dir.path().join("blender"), &runner, None),
            Err(DepotError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_program_is_not_storable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("blender");
        fs::write(&exe, "").unwrap();
        let runner = ScriptedRunner {
            python: dir.path().join("python"),
        };
        let mut program = BlenderProgram::probe(&exe, &runner, None).unwrap();
        let repo = tempfile::tempdir().unwrap();
        let target = crate::component::StorageTarget::new(repo.path(), "");
        assert!(matches!(
            program.store_in_repo(&target, false),
            Err(DepotError::NotAllowed { .. })
        ));
    }
}
