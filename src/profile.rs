//! Launch profiles.
//!
//! A profile binds at most one program, one setup and one venv. The venv must
//! trace back to the bound program; a rejected component never changes the
//! profile.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::component::{Capabilities, Component, ComponentCore, ComponentKind, Entity};
use crate::config::Platform;
use crate::error::{DepotError, IoContext, Result};
use crate::fsops;
use crate::process::{LaunchRequest, Launcher, ProcessHandle};
use crate::program::BlenderProgram;
use crate::setup::BlenderSetup;
use crate::venv::{self, BlenderVenv};

/// Default launch configs written inside the profile directory.
pub const LAUNCH_CONFIG_FILE: &str = "launch.json";

/// What `launch_blender` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlenderLaunchConfig {
    /// Point `BLENDER_USER_CONFIG` at the setup's config directory.
    pub use_user_config: bool,
    /// Point `BLENDER_USER_SCRIPTS` at the setup's scripts directory.
    pub use_user_scripts: bool,
    /// Add the venv's site-packages to Blender's path.
    pub use_venv_site_packages: bool,
    /// Add the venv's standalone `bpy` package directory.
    pub use_venv_bpy_package: bool,
    /// Add the venv's linked dev libraries.
    pub use_venv_dev_libraries: bool,
}

impl Default for BlenderLaunchConfig {
    fn default() -> Self {
        Self {
            use_user_config: true,
            use_user_scripts: true,
            use_venv_site_packages: true,
            use_venv_bpy_package: false,
            use_venv_dev_libraries: true,
        }
    }
}

/// What `launch_venv` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenvLaunchConfig {
    /// Add the program's bundled site-packages.
    pub use_blender_site_packages: bool,
    /// Add the standalone `bpy` package directory.
    pub use_bpy_package: bool,
    /// Add linked dev libraries.
    pub use_dev_libraries: bool,
}

impl Default for VenvLaunchConfig {
    fn default() -> Self {
        Self {
            use_blender_site_packages: false,
            use_bpy_package: true,
            use_dev_libraries: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LaunchDefaults {
    blender: BlenderLaunchConfig,
    venv: VenvLaunchConfig,
}

/// A program + setup + venv binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    core: ComponentCore,
    blender_program: Option<BlenderProgram>,
    blender_setup: Option<BlenderSetup>,
    blender_venv: Option<BlenderVenv>,
    blender_launch_config: BlenderLaunchConfig,
    venv_launch_config: VenvLaunchConfig,
}

impl Profile {
    /// Creates the profile directory `profiles_dir/<name>`.
    ///
    /// # Errors
    /// Returns `InvalidName`, `AlreadyExists` or an I/O error.
    pub fn create(name: &str, profiles_dir: &Path, repo_root: Option<&Path>) -> Result<Self> {
        fsops::validate_name(name)?;
        let dir = profiles_dir.join(name);
        if fsops::entry_exists(&dir) {
            return Err(DepotError::AlreadyExists(dir));
        }
        fsops::create_target_dir(&dir)?;

        let mut core = ComponentCore::new(name, Capabilities::AGGREGATE);
        core.bind(&dir, repo_root);
        let profile = Self {
            core,
            blender_program: None,
            blender_setup: None,
            blender_venv: None,
            blender_launch_config: BlenderLaunchConfig::default(),
            venv_launch_config: VenvLaunchConfig::default(),
        };
        profile.save_launch_configs()?;
        tracing::info!("Created profile {} at {}", name, dir.display());
        Ok(profile)
    }

    /// Profile directory.
    #[must_use]
    pub fn profile_dir(&self) -> Option<&Path> {
        self.core.data_path()
    }

    /// Bound program.
    #[must_use]
    pub fn blender_program(&self) -> Option<&BlenderProgram> {
        self.blender_program.as_ref()
    }

    /// Bound setup.
    #[must_use]
    pub fn blender_setup(&self) -> Option<&BlenderSetup> {
        self.blender_setup.as_ref()
    }

    /// Bound venv.
    #[must_use]
    pub fn blender_venv(&self) -> Option<&BlenderVenv> {
        self.blender_venv.as_ref()
    }

    /// Default Blender launch flags.
    #[must_use]
    pub fn blender_launch_config(&self) -> BlenderLaunchConfig {
        self.blender_launch_config
    }

    /// Default venv launch flags.
    #[must_use]
    pub fn venv_launch_config(&self) -> VenvLaunchConfig {
        self.venv_launch_config
    }

    /// Replaces the default launch flags and writes them to `launch.json`.
    ///
    /// # Errors
    /// Returns an I/O or JSON error.
    pub fn set_launch_configs(
        &mut self,
        blender: BlenderLaunchConfig,
        venv: VenvLaunchConfig,
    ) -> Result<()> {
        self.blender_launch_config = blender;
        self.venv_launch_config = venv;
        self.save_launch_configs()
    }

    fn save_launch_configs(&self) -> Result<()> {
        let Some(dir) = self.profile_dir() else {
            return Ok(());
        };
        let path = dir.join(LAUNCH_CONFIG_FILE);
        let defaults = LaunchDefaults {
            blender: self.blender_launch_config,
            venv: self.venv_launch_config,
        };
        fs::write(&path, serde_json::to_string_pretty(&defaults)?).at("Error writing", &path)
    }

    /// Binds a program, setup or venv.
    ///
    /// A venv requires a bound program it was derived from. Replacing the
    /// program unbinds a venv that does not belong to the new one.
    ///
    /// # Errors
    /// Returns `WrongComponentType`, `Consistency` (no program for a venv),
    /// `LineageMismatch`, or the component's own verification error.
    pub fn add_component(&mut self, component: Component) -> Result<()> {
        match component {
            Component::Program(program) => {
                program.verify()?;
                let keep_venv = self
                    .blender_venv
                    .as_ref()
                    .is_none_or(|v| v.originates_from(&program));
                if !keep_venv {
                    tracing::warn!(
                        "Unbinding venv from profile {}: it does not belong to {}",
                        self.core.name,
                        program.display_name()
                    );
                    self.blender_venv = None;
                }
                self.blender_program = Some(program);
            }
            Component::Setup(setup) => {
                setup.verify()?;
                self.blender_setup = Some(setup);
            }
            Component::Venv(venv) => {
                let program = self.blender_program.as_ref().ok_or_else(|| {
                    DepotError::Consistency(format!(
                        "Profile {} needs a Blender program before a venv",
                        self.core.name
                    ))
                })?;
                if !venv.originates_from(program) {
                    return Err(DepotError::LineageMismatch {
                        venv: venv.display_name(),
                        venv_program: venv.program_link().blender_exe_path.clone(),
                        program: program.blender_exe_path(),
                    });
                }
                venv.verify()?;
                self.blender_venv = Some(venv);
            }
            other => return Err(other.rejected_by("Profile")),
        }
        Ok(())
    }

    /// Clears the slot for `kind`. Removing the program also removes the venv.
    ///
    /// # Errors
    /// Returns `WrongComponentType` for kinds a profile never holds.
    pub fn remove_component(&mut self, kind: ComponentKind) -> Result<()> {
        match kind {
            ComponentKind::Program => {
                self.blender_program = None;
                self.blender_venv = None;
            }
            ComponentKind::Setup => self.blender_setup = None,
            ComponentKind::Venv => self.blender_venv = None,
            other => {
                return Err(DepotError::WrongComponentType {
                    target: "Profile".to_string(),
                    found: other.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Starts Blender detached with the selected setup and venv paths.
    ///
    /// `config` defaults to the profile's stored flags. Returns once the
    /// process has started.
    ///
    /// # Errors
    /// Returns `Consistency` with no program bound, verification errors, pth
    /// write errors or the launcher's error.
    pub fn launch_blender(
        &self,
        launcher: &dyn Launcher,
        config: Option<BlenderLaunchConfig>,
    ) -> Result<ProcessHandle> {
        let config = config.unwrap_or(self.blender_launch_config);
        let program = self.blender_program.as_ref().ok_or_else(|| {
            DepotError::Consistency(format!("Profile {} has no Blender program", self.core.name))
        })?;
        program.verify()?;

        let mut request = LaunchRequest::new(program.blender_exe_path());
        if let Some(setup) = &self.blender_setup {
            if config.use_user_config && setup.has_blender_config() {
                request = request.env("BLENDER_USER_CONFIG", setup.config_dir()?);
            }
            if config.use_user_scripts {
                request = request.env("BLENDER_USER_SCRIPTS", setup.scripts_dir()?);
            }
        }

        let mut paths = Vec::new();
        if let Some(venv) = &self.blender_venv {
            if config.use_venv_site_packages {
                paths.push(venv.site_packages_dir());
            }
            if config.use_venv_bpy_package {
                paths.push(venv.bpy_package_dir());
            }
            if config.use_venv_dev_libraries {
                paths.push(venv.local_libs_dir());
            }
        }
        venv::write_managed_pth(&program.site_packages_dir(), &paths)?;

        let handle = launcher.launch(&request)?;
        tracing::info!(
            "Launched {} for profile {} (pid {})",
            program.display_name(),
            self.core.name,
            handle.pid
        );
        Ok(handle)
    }

    /// Opens an interactive shell with the venv activated.
    ///
    /// # Errors
    /// Returns `Consistency` with no venv bound, verification errors, pth
    /// write errors or the launcher's error.
    pub fn launch_venv(
        &self,
        launcher: &dyn Launcher,
        config: Option<VenvLaunchConfig>,
    ) -> Result<ProcessHandle> {
        let config = config.unwrap_or(self.venv_launch_config);
        let venv = self.blender_venv.as_ref().ok_or_else(|| {
            DepotError::Consistency(format!("Profile {} has no venv", self.core.name))
        })?;
        venv.verify()?;
        let venv_dir = venv.core().require_data_path()?;

        let mut paths = Vec::new();
        if config.use_blender_site_packages {
            if let Some(program) = &self.blender_program {
                paths.push(program.site_packages_dir());
            }
        }
        if config.use_bpy_package {
            paths.push(venv.bpy_package_dir());
        }
        if config.use_dev_libraries {
            paths.push(venv.local_libs_dir());
        }
        venv::write_managed_pth(&venv.site_packages_dir(), &paths)?;

        let platform = Platform::current();
        let (shell, args) = platform.interactive_shell();
        let mut request = LaunchRequest::new(shell)
            .env("VIRTUAL_ENV", venv_dir)
            .env("PATH", prepend_path(&venv.bin_dir(), platform))
            .cwd(venv_dir);
        for arg in args {
            request = request.arg(arg);
        }

        let handle = launcher.launch(&request)?;
        tracing::info!("Opened venv shell {} (pid {})", venv.display_name(), handle.pid);
        Ok(handle)
    }
}

fn prepend_path(dir: &Path, platform: Platform) -> OsString {
    let mut value = OsString::from(dir);
    if let Some(existing) = std::env::var_os("PATH") {
        value.push(platform.path_separator().to_string());
        value.push(existing);
    }
    value
}

impl Entity for Profile {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Profile
    }

    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    /// Every bound component must verify; empty slots are skipped.
    fn verify(&self) -> Result<()> {
        if let Some(program) = &self.blender_program {
            program.verify()?;
        }
        if let Some(setup) = &self.blender_setup {
            setup.verify()?;
        }
        if let Some(venv) = &self.blender_venv {
            venv.verify()?;
        }
        Ok(())
    }

    fn relocate(&mut self, repo_root: &Path) {
        self.core.relocate(repo_root);
        if let Some(program) = &mut self.blender_program {
            program.relocate(repo_root);
        }
        if let Some(setup) = &mut self.blender_setup {
            setup.relocate(repo_root);
        }
        if let Some(venv) = &mut self.blender_venv {
            venv.relocate(repo_root);
        }
    }
}
