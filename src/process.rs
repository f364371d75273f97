//! External process collaborators.
//!
//! Probing (`blender --version`, `pip freeze`) goes through a
//! [`CommandRunner`] and blocks with a timeout. Launching Blender or a venv
//! shell goes through a [`Launcher`] and never waits for the child to exit.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{DepotError, Result};

/// Polling interval while waiting for a probe to finish.
const POLL_INTERVAL_MS: u64 = 20;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal.
    pub status: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns true if the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Converts a non-zero exit into `ToolFailed`.
    ///
    /// # Errors
    /// Returns `ToolFailed` with the captured output.
    pub fn into_success(self, program: &Path) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(DepotError::ToolFailed {
            program: program.display().to_string(),
            status: self
                .status
                .map_or_else(|| "signal".to_string(), |c| format!("code {}", c)),
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Runs a program to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`.
    ///
    /// # Errors
    /// Spawn failures and timeouts are errors; a non-zero exit is not.
    fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `std::process` with a timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    /// Creates a runner that kills probes after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn join_output(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        let name = program.display().to_string();
        tracing::debug!("Running {} {}", name, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DepotError::Spawn {
                program: name.clone(),
                source,
            })?;

        // Pipes are drained on threads so a chatty child cannot block on a full buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Ok(CommandOutput {
                        status: status.code(),
                        stdout: join_output(stdout),
                        stderr: join_output(stderr),
                    });
                }
                Ok(None) => {
                    if start.elapsed() >= self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        tracing::warn!("{} timed out after {:?}", name, self.timeout);
                        return Err(DepotError::Timeout {
                            program: name,
                            seconds: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
                }
                Err(source) => {
                    let _ = child.kill();
                    return Err(DepotError::Spawn {
                        program: name,
                        source,
                    });
                }
            }
        }
    }
}

/// Description of a detached launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Executable to start.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<OsString>,
    /// Extra environment variables.
    pub env: BTreeMap<String, OsString>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

impl LaunchRequest {
    /// Creates a request for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

/// Handle to a started process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    /// OS process id.
    pub pid: u32,
}

/// Starts processes without waiting for them.
pub trait Launcher: Send + Sync {
    /// Starts the process described by `request`.
    ///
    /// # Errors
    /// Returns `Spawn` if the process could not be started.
    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle>;
}

/// [`Launcher`] that detaches the child and reaps it on a background thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher {
    /// Inherit the terminal instead of using null stdio (interactive shells).
    pub interactive: bool,
}

impl DetachedLauncher {
    /// Launcher with null stdio.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher that inherits the terminal and waits for the child.
    #[must_use]
    pub fn interactive() -> Self {
        Self { interactive: true }
    }
}

impl Launcher for DetachedLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        let name = request.program.display().to_string();
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        cmd.envs(&request.env);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        if !self.interactive {
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::null());
            cmd.stderr(Stdio::null());
        }

        let mut child: Child = cmd.spawn().map_err(|source| DepotError::Spawn {
            program: name.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::info!("Started {} (pid {})", name, pid);

        if self.interactive {
            // The shell owns the terminal until it exits.
            let status = child.wait().map_err(|source| DepotError::Spawn {
                program: name.clone(),
                source,
            })?;
            tracing::debug!("{} exited with {}", name, status);
        } else {
            reap_in_background(child, name);
        }
        Ok(ProcessHandle { pid })
    }
}

fn reap_in_background(mut child: Child, name: String) {
    thread::spawn(move || match child.wait() {
        Ok(status) => tracing::debug!("{} exited with {}", name, status),
        Err(e) => tracing::warn!("Failed waiting for {}: {}", name, e),
    });
}
