//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use blender_depot::error::Result;
use blender_depot::process::{CommandOutput, CommandRunner, LaunchRequest, Launcher, ProcessHandle};
use zip::write::SimpleFileOptions;

/// `bl_info` block declaring `name` and `version`.
pub fn bl_info(name: &str, version: (u32, u32, u32)) -> String {
    format!(
        "bl_info = {{\n    \"name\": \"{}\",\n    \"author\": \"Test\",\n    \"version\": ({}, {}, {}),\n    \"blender\": (4, 1, 0),\n    \"description\": \"Fixture addon\",\n}}\n\n\ndef register():\n    pass\n",
        name, version.0, version.1, version.2
    )
}

/// Writes a zip with the given `(entry, contents)` pairs.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            zip.add_directory(name.trim_end_matches('/'), options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Sorted entry names of a zip.
pub fn zip_entries(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

/// Writes `contents` to `path`, creating parents.
pub fn write_file(path: &Path, contents: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    path.to_path_buf()
}

/// Runner answering the Blender probes with canned output.
pub struct FakeRunner {
    /// Interpreter path reported by the Python probe.
    pub python: PathBuf,
    /// Blender version banner.
    pub blender_version: String,
    /// `pip freeze` output.
    pub freeze: String,
    /// Every `(program, args)` seen.
    pub calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeRunner {
    pub fn new(python: PathBuf) -> Self {
        Self {
            python,
            blender_version: "4.1.0".to_string(),
            freeze: "numpy==1.24.3\nrequests==2.31.0\n".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push((
            program.to_path_buf(),
            args.iter().map(|a| (*a).to_string()).collect(),
        ));
        let stdout = match args {
            ["--version", ..] => format!("Blender {}\n", self.blender_version),
            ["--background", ..] => format!(
                "interpreter_path: {}\nversion: 3.11.7 (main)\n",
                self.python.display()
            ),
            ["-m", "venv", target] => {
                fake_venv(Path::new(target), &self.python);
                String::new()
            }
            _ => self.freeze.clone(),
        };
        Ok(CommandOutput {
            status: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

/// Lays out a minimal venv whose base interpreter is `python`.
pub fn fake_venv(dir: &Path, python: &Path) {
    fs::create_dir_all(dir).unwrap();
    let home = python.parent().unwrap();
    write_file(
        &dir.join("pyvenv.cfg"),
        &format!(
            "home = {}\ninclude-system-site-packages = false\nversion = 3.11.7\nbase-executable = {}\n",
            home.display(),
            python.display()
        ),
    );
}

/// Creates `<root>/blender` plus `<root>/4.1/python/bin/python3.11`, the
/// layout probes and venv lineage expect on Unix.
pub struct FakeInstall {
    pub blender_exe: PathBuf,
    pub python: PathBuf,
}

pub fn fake_install(root: &Path) -> FakeInstall {
    let blender_exe = write_file(
        &root.join(blender_depot::config::Platform::current().blender_exe_name()),
        "",
    );
    let python = write_file(
        &root.join("4.1").join("python").join("bin").join("python3.11"),
        "",
    );
    FakeInstall { blender_exe, python }
}

/// Launcher that records requests instead of starting processes.
#[derive(Default)]
pub struct RecordingLauncher {
    pub requests: Mutex<Vec<LaunchRequest>>,
}

impl RecordingLauncher {
    pub fn last(&self) -> LaunchRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(ProcessHandle { pid: 4242 })
    }
}
