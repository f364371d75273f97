//! Process-wide collaborators.
//!
//! Bundles the configuration with the command runner, launchers, package
//! index and object pool so callers pass one value instead of five.

use std::path::Path;

use crate::component::Entity;
use crate::config::Config;
use crate::error::Result;
use crate::fsops;
use crate::pool::{ObjectCache, ObjectPool, pool_key};
use crate::process::{CommandRunner, DetachedLauncher, Launcher, SystemRunner};
use crate::program::BlenderProgram;
use crate::python::{PackageIndex, PackageSet, PyPiIndex};
use crate::repository::Repository;

/// Configuration plus the services components talk to.
pub struct DepotContext {
    /// Loaded configuration.
    pub config: Config,
    /// Runs blender/python probes.
    pub runner: Box<dyn CommandRunner>,
    /// Starts Blender.
    pub launcher: Box<dyn Launcher>,
    /// Starts interactive venv shells.
    pub shell_launcher: Box<dyn Launcher>,
    /// Optional package metadata source.
    pub index: Option<Box<dyn PackageIndex>>,
    program_pool: ObjectPool<BlenderProgram>,
}

impl DepotContext {
    /// Context with the system runner, detached launchers and the configured
    /// package index. The object pool is loaded from its save file.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let runner = Box::new(SystemRunner::new(config.probe_timeout));
        let index: Option<Box<dyn PackageIndex>> = if config.package_index_url.is_empty() {
            None
        } else {
            Some(Box::new(PyPiIndex::new(&config.package_index_url)))
        };
        Self::with_collaborators(
            config,
            runner,
            Box::new(DetachedLauncher::new()),
            Box::new(DetachedLauncher::interactive()),
            index,
        )
    }

    /// Context with explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: Config,
        runner: Box<dyn CommandRunner>,
        launcher: Box<dyn Launcher>,
        shell_launcher: Box<dyn Launcher>,
        index: Option<Box<dyn PackageIndex>>,
    ) -> Self {
        let program_pool = ObjectPool::new(&config.object_pool_file);
        if let Err(e) = program_pool.load() {
            tracing::warn!(
                "Ignoring unreadable object pool {}: {}",
                config.object_pool_file.display(),
                e
            );
        }
        Self {
            config,
            runner,
            launcher,
            shell_launcher,
            index,
            program_pool,
        }
    }

    /// Pooled programs.
    #[must_use]
    pub fn program_pool(&self) -> &ObjectPool<BlenderProgram> {
        &self.program_pool
    }

    /// Opens the configured repository.
    ///
    /// # Errors
    /// Returns the repository's open error.
    pub fn open_repository(&self) -> Result<Repository> {
        Repository::open(&self.config.repository)
    }

    /// Probes `blender_exe`, reusing a pooled result when `pooled` is set.
    ///
    /// A fresh probe is added to the pool and the pool is saved; a failed
    /// save only logs a warning.
    ///
    /// # Errors
    /// Returns the probe error.
    pub fn probe_program(
        &self,
        blender_exe: &Path,
        pooled: bool,
        repo_root: Option<&Path>,
    ) -> Result<BlenderProgram> {
        if !pooled {
            return BlenderProgram::probe(blender_exe, self.runner.as_ref(), repo_root);
        }

        let exe = fsops::to_posix_string(&fsops::normalize(blender_exe));
        let key = pool_key("BlenderProgram", &[&exe], &[]);
        if let Some(mut program) = self.program_pool.get(&key) {
            if program.has_exe(blender_exe) && program.verify().is_ok() {
                if let Some(root) = repo_root {
                    program.relocate(root);
                }
                tracing::debug!("Reusing pooled probe for {}", exe);
                return Ok(program);
            }
            self.program_pool.remove(&key);
        }

        let program = BlenderProgram::probe(blender_exe, self.runner.as_ref(), repo_root)?;
        self.program_pool.put(key, program.clone());
        if let Err(e) = self.program_pool.save() {
            tracing::warn!("Could not save object pool: {}", e);
        }
        Ok(program)
    }

    /// Fills in package summaries from the index, if one is configured.
    ///
    /// Returns how many packages were found in the index.
    pub fn enrich_packages(&self, packages: &mut PackageSet) -> usize {
        match &self.index {
            Some(index) => packages.enrich(index.as_ref()),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, LaunchRequest, ProcessHandle};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingRunner {
        calls: Arc<AtomicUsize>,
    }

    impl CommandRunner for CountingRunner {
        fn run(&self, _program: &Path, args: &[&str]) -> Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stdout = match args.first().copied() {
                Some("--version") => "Blender 4.2.1\n".to_string(),
                Some("--background") => {
                    "interpreter_path: /opt/blender/4.2/python/bin/python3.11\nversion: 3.11.9\n"
                        .to_string()
                }
                _ => "numpy==1.26.4\n".to_string(),
            };
            Ok(CommandOutput {
                status: Some(0),
                stdout,
                stderr: String::new(),
            })
        }
    }

    struct NoLaunch;

    impl Launcher for NoLaunch {
        fn launch(&self, _request: &LaunchRequest) -> Result<ProcessHandle> {
            Ok(ProcessHandle { pid: 0 })
        }
    }

    fn context(dir: &Path, calls: Arc<AtomicUsize>) -> DepotContext {
        let config = Config {
            repository: dir.join("repo"),
            object_pool_file: dir.join("pool.json"),
            ..Config::default()
        };
        DepotContext::with_collaborators(
            config,
            Box::new(CountingRunner { calls }),
            Box::new(NoLaunch),
            Box::new(NoLaunch),
            None,
        )
    }

    #[test]
    fn test_pooled_probe_runs_once_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let exe: PathBuf = dir.path().join("blender");
        std::fs::write(&exe, "").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let ctx = context(dir.path(), Arc::clone(&calls));
        let first = ctx.probe_program(&exe, true, None).unwrap();
        let after_first = calls.load(Ordering::SeqCst);
        assert_eq!(after_first, 3);
        let second = ctx.probe_program(&exe, true, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), after_first);
        assert_eq!(first.core().uuid, second.core().uuid);
        assert!(dir.path().join("pool.json").is_file());

        let reloaded = context(dir.path(), Arc::clone(&calls));
        assert_eq!(reloaded.program_pool().len(), 1);
        reloaded.probe_program(&exe, true, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_unpooled_probe_always_runs() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("blender");
        std::fs::write(&exe, "").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = context(dir.path(), Arc::clone(&calls));
        ctx.probe_program(&exe, false, None).unwrap();
        ctx.probe_program(&exe, false, None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert!(ctx.program_pool().is_empty());
    }

    #[test]
    fn test_enrich_without_index_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Arc::new(AtomicUsize::new(0)));
        let mut set = PackageSet::from_freeze_text("numpy==1.26.4\n");
        assert_eq!(ctx.enrich_packages(&mut set), 0);
    }
}
