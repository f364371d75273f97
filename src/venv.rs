//! Virtual environments derived from a Blender program.
//!
//! A venv records the Blender executable it was created from (its lineage)
//! so profiles can refuse to pair it with a different install.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::component::{Capabilities, ComponentCore, ComponentKind, Deployable, Entity};
use crate::config::Platform;
use crate::dev_library::PythonDevLibrary;
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;
use crate::process::CommandRunner;
use crate::program::BlenderProgram;
use crate::python::PackageSet;

/// Venv config file name.
pub const VENV_CONFIG_FILE: &str = "pyvenv.cfg";

/// Inclusion file rewritten before each launch.
pub const MANAGED_PTH_FILE: &str = "_bdepot_managed_packages.pth";

/// Marker appended to every managed `.pth` line.
const MANAGED_MARKER: &str = "# depot_managed_path:";

const BPY_PACKAGE_DIR: &str = "bpy_package";
const BPY_PACKAGE_NAME: &str = "bpy";
const LOCAL_LIBS_DIR: &str = "local_libs";

/// Recorded origin of a venv.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramLink {
    /// Repository program the venv is linked to, once matched.
    pub uuid: Option<Uuid>,
    /// Blender executable derived from the venv's base interpreter.
    pub blender_exe_path: PathBuf,
}

/// A virtual environment created from a Blender bundled interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlenderVenv {
    core: ComponentCore,
    venv_config: BTreeMap<String, String>,
    program: ProgramLink,
    python_minor: String,
    python_packages: PackageSet,
}

impl BlenderVenv {
    /// Loads the venv at `path`.
    ///
    /// # Errors
    /// Returns `PathNotFound` if the directory or its `pyvenv.cfg` is missing
    /// and `Format` if the config does not name a base interpreter.
    pub fn from_path(path: &Path, repo_root: Option<&Path>) -> Result<Self> {
        if !path.is_dir() {
            return Err(DepotError::PathNotFound(path.to_path_buf()));
        }
        let path = std::path::absolute(path).at("Error resolving", path)?;
        let cfg_path = path.join(VENV_CONFIG_FILE);
        if !cfg_path.is_file() {
            return Err(DepotError::PathNotFound(cfg_path));
        }
        let venv_config = parse_venv_config(&fs::read_to_string(&cfg_path).at("Error reading", &cfg_path)?);

        let platform = Platform::current();
        let base_python = base_interpreter(&venv_config, platform).ok_or_else(|| {
            DepotError::Format(format!(
                "{} names neither base-executable nor home",
                cfg_path.display()
            ))
        })?;
        let blender_exe_path = platform
            .blender_exe_from_base_python(&base_python)
            .ok_or_else(|| {
                DepotError::Format(format!(
                    "Cannot derive a Blender executable from {}",
                    base_python.display()
                ))
            })?;
        let python_minor = python_minor_from_config(&venv_config)
            .or_else(|| python_minor_from_layout(&path))
            .unwrap_or_default();

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DepotError::InvalidName(path.display().to_string()))?;
        let mut core = ComponentCore::new(name, Capabilities::default());
        core.bind(&path, repo_root);

        let mut venv = Self {
            core,
            venv_config,
            program: ProgramLink {
                uuid: None,
                blender_exe_path,
            },
            python_minor,
            python_packages: PackageSet::new(),
        };
        venv.refresh_packages();
        Ok(venv)
    }

    /// Creates a venv at `venv_dir` from `program`'s bundled interpreter.
    ///
    /// # Errors
    /// Returns the program's verification error, `AlreadyExists` when the
    /// target exists and `delete_existing` is false, or the `venv` module's
    /// failure.
    pub fn create_from_program(
        program: &BlenderProgram,
        venv_dir: &Path,
        runner: &dyn CommandRunner,
        repo_root: Option<&Path>,
        delete_existing: bool,
    ) -> Result<Self> {
        program.verify()?;
        fsops::ready_target_path(venv_dir, delete_existing)?;

        let python = program.python_exe_path();
        let target = venv_dir.to_string_lossy();
        runner
            .run(&python, &["-m", "venv", target.as_ref()])?
            .into_success(&python)?;

        let mut venv = Self::from_path(venv_dir, repo_root)?;
        venv.link_program(program)?;
        tracing::info!("Created venv {} from {}", venv.core.name, program.display_name());
        Ok(venv)
    }

    /// Venv directory.
    #[must_use]
    pub fn venv_path(&self) -> Option<&Path> {
        self.core.data_path()
    }

    fn lib_dir(&self) -> PathBuf {
        let root = self.venv_path().unwrap_or_else(|| Path::new(""));
        root.join(Platform::current().venv_lib_dir(&self.python_minor))
    }

    /// `site-packages` of the venv.
    #[must_use]
    pub fn site_packages_dir(&self) -> PathBuf {
        self.lib_dir().join("site-packages")
    }

    /// Directory holding the standalone `bpy` package.
    #[must_use]
    pub fn bpy_package_dir(&self) -> PathBuf {
        self.lib_dir().join(BPY_PACKAGE_DIR)
    }

    /// Directory holding linked dev libraries.
    #[must_use]
    pub fn local_libs_dir(&self) -> PathBuf {
        self.lib_dir().join(LOCAL_LIBS_DIR)
    }

    /// Directory holding the venv's executables.
    #[must_use]
    pub fn bin_dir(&self) -> PathBuf {
        let root = self.venv_path().unwrap_or_else(|| Path::new(""));
        root.join(Platform::current().venv_bin_dir())
    }

    /// Interpreter inside the venv.
    #[must_use]
    pub fn python_exe_path(&self) -> PathBuf {
        self.bin_dir().join(Platform::current().venv_python_name())
    }

    /// Key-value pairs from `pyvenv.cfg`.
    #[must_use]
    pub fn venv_config(&self) -> &BTreeMap<String, String> {
        &self.venv_config
    }

    /// Recorded lineage.
    #[must_use]
    pub fn program_link(&self) -> &ProgramLink {
        &self.program
    }

    /// Packages found in `site-packages`.
    #[must_use]
    pub fn python_packages(&self) -> &PackageSet {
        &self.python_packages
    }

    /// True if this venv was derived from `program`'s executable.
    #[must_use]
    pub fn originates_from(&self, program: &BlenderProgram) -> bool {
        program.has_exe(&self.program.blender_exe_path)
    }

    /// Links the venv to a repository program with a matching executable.
    ///
    /// # Errors
    /// Returns `LineageMismatch` if the executables differ.
    pub fn link_program(&mut self, program: &BlenderProgram) -> Result<()> {
        if !self.originates_from(program) {
            return Err(DepotError::LineageMismatch {
                venv: self.core.name.clone(),
                venv_program: self.program.blender_exe_path.clone(),
                program: program.blender_exe_path(),
            });
        }
        self.program.uuid = Some(program.core().uuid);
        Ok(())
    }

    /// Rescans `site-packages`. A missing directory yields an empty set.
    pub fn refresh_packages(&mut self) {
        let site_packages = self.site_packages_dir();
        self.python_packages = if site_packages.is_dir() {
            PackageSet::from_site_packages(&site_packages).unwrap_or_else(|e| {
                tracing::warn!("Could not scan {}: {}", site_packages.display(), e);
                PackageSet::new()
            })
        } else {
            PackageSet::new()
        };
    }

    /// Installs the standalone `bpy` module into the venv's `bpy_package`
    /// directory with `pip install --target`.
    ///
    /// Returns false without running pip when `bpy` is already there and
    /// `force` is not set; `force` removes the existing copy first.
    ///
    /// # Errors
    /// Returns pip's `ToolFailed`, an I/O error when the old copy cannot be
    /// removed, or `Consistency` when pip succeeds but no `bpy` appears.
    pub fn install_bpy_package(&self, runner: &dyn CommandRunner, force: bool) -> Result<bool> {
        let target = self.bpy_package_dir();
        let installed = target.join(BPY_PACKAGE_NAME);
        if installed.exists() {
            if !force {
                tracing::debug!("bpy already installed at {}", installed.display());
                return Ok(false);
            }
            fsops::remove_target_path(&installed)?;
        }

        let target_arg = target.to_string_lossy().into_owned();
        self.pip_install(runner, &[BPY_PACKAGE_NAME, "--target", &target_arg])?;
        if !installed.exists() {
            return Err(DepotError::Consistency(format!(
                "pip finished but {} is missing",
                installed.display()
            )));
        }
        tracing::info!("Installed bpy into {}", target.display());
        Ok(true)
    }

    /// Installs `packages` into the venv's site-packages and rescans it.
    ///
    /// # Errors
    /// Returns pip's `ToolFailed`, or `Consistency` naming the packages that
    /// are still missing afterwards.
    pub fn install_site_packages(
        &mut self,
        runner: &dyn CommandRunner,
        packages: &PackageSet,
    ) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let requirements: Vec<String> = packages.iter().map(|p| p.requirement_string()).collect();
        let args: Vec<&str> = requirements.iter().map(String::as_str).collect();
        self.pip_install(runner, &args)?;

        self.refresh_packages();
        let missing: Vec<&str> = packages
            .iter()
            .filter(|p| !self.python_packages.contains(&p.name))
            .map(|p| p.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(DepotError::Consistency(format!(
                "pip finished but {} not installed in {}",
                missing.join(", "),
                self.core.name
            )));
        }
        tracing::info!("Installed {} package(s) into venv {}", packages.len(), self.core.name);
        Ok(())
    }

    fn pip_install(&self, runner: &dyn CommandRunner, args: &[&str]) -> Result<()> {
        let python = self.python_exe_path();
        let mut full = vec!["-m", "pip", "install"];
        full.extend_from_slice(args);
        runner.run(&python, &full)?.into_success(&python)?;
        Ok(())
    }

    /// Links a dev library into the venv's local library directory.
    ///
    /// # Errors
    /// Returns the library's deploy error.
    pub fn install_dev_library(
        &self,
        library: &PythonDevLibrary,
        delete_existing: bool,
    ) -> Result<PathBuf> {
        library.deploy(&self.local_libs_dir(), delete_existing)
    }
}

impl Entity for BlenderVenv {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Venv
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn verify(&self) -> Result<()> {
        self.core.verify_platform()?;
        self.core.verify_exists()?;
        let cfg = self.core.require_data_path()?.join(VENV_CONFIG_FILE);
        if !cfg.is_file() {
            return Err(DepotError::PathNotFound(cfg));
        }
        // The Blender the venv was derived from must still be installed.
        let exe = &self.program.blender_exe_path;
        if exe.is_file() {
            Ok(())
        } else {
            Err(DepotError::PathNotFound(exe.clone()))
        }
    }
}

/// Path of the managed inclusion file inside `site_packages`.
#[must_use]
pub fn managed_pth_path(site_packages: &Path) -> PathBuf {
    site_packages.join(MANAGED_PTH_FILE)
}

/// Rewrites the managed `.pth` file in `site_packages` to add `paths`.
///
/// An empty selection removes the file. Returns the file path when written.
///
/// # Errors
/// Returns an I/O error if the file cannot be written or removed.
pub fn write_managed_pth(site_packages: &Path, paths: &[PathBuf]) -> Result<Option<PathBuf>> {
    let pth = managed_pth_path(site_packages);
    if paths.is_empty() {
        fsops::remove_target_path(&pth)?;
        tracing::debug!("Removed {}", pth.display());
        return Ok(None);
    }

    let content: String = paths.iter().map(|p| managed_line(p)).collect();
    fsops::create_target_dir(site_packages)?;
    fs::write(&pth, content).at("Error writing", &pth)?;
    tracing::debug!("Wrote {} managed paths to {}", paths.len(), pth.display());
    Ok(Some(pth))
}

fn managed_line(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "import sys; sys.path.append(\"{}\")  {} {}\n",
        fsops::to_posix_string(path),
        MANAGED_MARKER,
        name
    )
}

/// Parses `key = value` lines; later keys do not override earlier ones.
fn parse_venv_config(content: &str) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once('=') {
            config
                .entry(key.trim().to_string())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    config
}

fn base_interpreter(config: &BTreeMap<String, String>, platform: Platform) -> Option<PathBuf> {
    if let Some(exe) = config.get("base-executable") {
        return Some(PathBuf::from(exe));
    }
    config
        .get("home")
        .map(|home| PathBuf::from(home).join(platform.venv_python_name()))
}

fn python_minor_from_config(config: &BTreeMap<String, String>) -> Option<String> {
    let version = config
        .get("version_info")
        .or_else(|| config.get("version"))?;
    let mut parts = version.split('.');
    let (major, minor) = (parts.next()?, parts.next()?);
    Some(format!("{}.{}", major.trim(), minor.trim()))
}

fn python_minor_from_layout(venv: &Path) -> Option<String> {
    fs::read_dir(venv.join("lib"))
        .ok()?
        .filter_map(std::result::Result::ok)
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("python"))
                .map(str::to_string)
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_venv(root: &Path, base: &Path) -> PathBuf {
        let venv = root.join("venv");
        fs::create_dir_all(&venv).unwrap();
        fs::write(
            venv.join(VENV_CONFIG_FILE),
            format!(
                "home = {}\ninclude-system-site-packages = false\nversion = 3.11.7\nbase-executable = {}\n",
                base.parent().unwrap().display(),
                base.display()
            ),
        )
        .unwrap();
        venv
    }

    #[test]
    fn test_parse_venv_config() {
        let cfg = parse_venv_config("home = /usr/bin\nversion = 3.11.7\n\nbogus line\nhome = /other\n");
        assert_eq!(cfg.get("home").map(String::as_str), Some("/usr/bin"));
        assert_eq!(python_minor_from_config(&cfg), Some("3.11".to_string()));
    }

    #[test]
    fn test_from_path_derives_lineage() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir
            .path()
            .join("blender")
            .join("4.1")
            .join("python")
            .join("bin")
            .join("python3.11");
        let venv_dir = fake_venv(dir.path(), &base);

        let venv = BlenderVenv::from_path(&venv_dir, None).unwrap();
        let expected = Platform::current()
            .blender_exe_from_base_python(&base)
            .unwrap();
        assert_eq!(venv.program_link().blender_exe_path, expected);
        assert!(venv.program_link().uuid.is_none());
        assert!(venv.site_packages_dir().ends_with("site-packages"));
        assert!(venv.python_packages().is_empty());
    }

    /// Runner standing in for pip: lays out what a real install would leave.
    struct PipRunner {
        site_packages: PathBuf,
        calls: std::sync::Mutex<Vec<Vec<String>>>,
        skip: Option<&'static str>,
    }

    impl PipRunner {
        fn new(venv: &BlenderVenv) -> Self {
            Self {
                site_packages: venv.site_packages_dir(),
                calls: std::sync::Mutex::new(Vec::new()),
                skip: None,
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for PipRunner {
        fn run(&self, _program: &Path, args: &[&str]) -> Result<crate::process::CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| (*a).to_string()).collect());
            let requested = &args[3..];
            if let Some(pos) = requested.iter().position(|a| *a == "--target") {
                fs::create_dir_all(Path::new(requested[pos + 1]).join("bpy")).unwrap();
            } else {
                for &req in requested {
                    let (name, version) = req.split_once("==").unwrap_or((req, "0"));
                    if Some(name) == self.skip {
                        continue;
                    }
                    let meta = self.site_packages.join(format!("{}-{}.dist-info", name, version));
                    fs::create_dir_all(&meta).unwrap();
                    fs::write(meta.join("METADATA"), format!("Name: {}\nVersion: {}\n", name, version))
                        .unwrap();
                }
            }
            Ok(crate::process::CommandOutput {
                status: Some(0),
                ..Default::default()
            })
        }
    }

    fn loaded_venv(dir: &Path) -> BlenderVenv {
        let base = dir.join("blender").join("4.1").join("python").join("bin").join("python3.11");
        BlenderVenv::from_path(&fake_venv(dir, &base), None).unwrap()
    }

    #[test]
    fn test_install_bpy_package_uses_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let venv = loaded_venv(dir.path());
        let runner = PipRunner::new(&venv);

        assert!(venv.install_bpy_package(&runner, false).unwrap());
        assert!(venv.bpy_package_dir().join("bpy").is_dir());
        let call = &runner.calls()[0];
        assert_eq!(&call[..4], ["-m", "pip", "install", "bpy"]);
        assert_eq!(call[5], venv.bpy_package_dir().to_string_lossy());

        assert!(!venv.install_bpy_package(&runner, false).unwrap());
        assert_eq!(runner.calls().len(), 1);
        assert!(venv.install_bpy_package(&runner, true).unwrap());
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_install_site_packages_rescans() {
        let dir = tempfile::tempdir().unwrap();
        let mut venv = loaded_venv(dir.path());
        let runner = PipRunner::new(&venv);
        let wanted = PackageSet::from_freeze_text("numpy==1.26.4\nrequests==2.31.0\n");

        venv.install_site_packages(&runner, &wanted).unwrap();
        assert_eq!(runner.calls()[0], ["-m", "pip", "install", "numpy==1.26.4", "requests==2.31.0"]);
        assert!(venv.python_packages().contains("numpy"));
        assert!(venv.python_packages().contains("requests"));

        venv.install_site_packages(&runner, &PackageSet::new()).unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_install_site_packages_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut venv = loaded_venv(dir.path());
        let mut runner = PipRunner::new(&venv);
        runner.skip = Some("requests");
        let wanted = PackageSet::from_freeze_text("numpy==1.26.4\nrequests==2.31.0\n");

        let err = venv.install_site_packages(&runner, &wanted).unwrap_err();
        assert!(matches!(&err, DepotError::Consistency(msg) if msg.contains("requests")));
    }

    #[test]
    fn test_verify_requires_lineage_blender() {
        let dir = tempfile::tempdir().unwrap();
        let venv = loaded_venv(dir.path());
        let exe = venv.program_link().blender_exe_path.clone();
        assert!(matches!(venv.verify(), Err(DepotError::PathNotFound(ref p)) if *p == exe));

        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "").unwrap();
        assert!(venv.verify().is_ok());

        fs::remove_file(&exe).unwrap();
        assert!(venv.verify().is_err());
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BlenderVenv::from_path(dir.path(), None),
            Err(DepotError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_write_managed_pth() {
        let dir = tempfile::tempdir().unwrap();
        let site = dir.path().join("site-packages");
        let paths = vec![PathBuf::from("/venv/lib/bpy_package"), PathBuf::from("/venv/lib/local_libs")];

        let pth = write_managed_pth(&site, &paths).unwrap().unwrap();
        let content = fs::read_to_string(&pth).unwrap();
        assert_eq!(
            content.lines().next().unwrap(),
            "import sys; sys.path.append(\"/venv/lib/bpy_package\")  # depot_managed_path: bpy_package"
        );
        assert_eq!(content.lines().count(), 2);

        assert!(write_managed_pth(&site, &[]).unwrap().is_none());
        assert!(!pth.exists());
        assert!(write_managed_pth(&site, &[]).unwrap().is_none());
    }
}
