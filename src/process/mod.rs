//! Process execution.
//!
//! Every external tool the pipeline touches (cargo, make, docker, QEMU) is
//! described by a [`Cmd`] and handed to an [`Executor`]. Stages never call
//! `std::process` directly, so tests can swap in a fake executor that never
//! spawns anything.
//!
//! ```rust,ignore
//! use chaos_builder::process::{Cmd, SystemExecutor};
//!
//! Cmd::new("make")
//!     .arg("build")
//!     .current_dir("os")
//!     .run_interactive(&SystemExecutor)?;
//! ```

#[cfg(test)]
pub(crate) mod fake;

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::error::{Error, ExitStatus, Result};

/// A command to run: program, arguments and working directory.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: impl AsRef<Path>) -> Self {
        self.arg(path.as_ref().as_os_str())
    }

    /// Working directory for this command only. The builder process never
    /// changes its own directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Return the result instead of failing on a nonzero exit.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Shell-like rendering used in logs and error messages.
    pub fn display(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Run with captured output.
    pub fn run(&self, executor: &dyn Executor) -> Result<CommandResult> {
        debug!(command = %self.display(), cwd = ?self.cwd, "run");
        let result = executor.capture(self)?;
        self.check(result)
    }

    /// Run attached to the terminal so the tool's own diagnostics reach the
    /// operator unchanged.
    pub fn run_interactive(&self, executor: &dyn Executor) -> Result<CommandResult> {
        debug!(command = %self.display(), cwd = ?self.cwd, "run (interactive)");
        let result = executor.interactive(self)?;
        self.check(result)
    }

    /// Start in the background with stdout piped for the caller to read.
    pub fn spawn_piped(&self, executor: &dyn Executor) -> Result<ChildGuard> {
        debug!(command = %self.display(), cwd = ?self.cwd, "spawn (piped)");
        executor.spawn_piped(self)
    }

    fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if self.allow_fail || result.success() {
            return Ok(result);
        }
        Err(Error::BuildFailure {
            command: self.display(),
            status: result.status,
        })
    }
}

/// Outcome of a finished command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    /// Empty for interactive runs.
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// The capability to run a command to completion and report its exit
/// status and output.
pub trait Executor {
    /// Run with stdout and stderr captured.
    fn capture(&self, cmd: &Cmd) -> Result<CommandResult>;

    /// Run in the foreground with inherited stdio, blocking until it exits.
    fn interactive(&self, cmd: &Cmd) -> Result<CommandResult>;

    /// Start without waiting. Stdin is closed, stdout piped, stderr
    /// inherited. The guard kills the child if dropped unreaped.
    fn spawn_piped(&self, cmd: &Cmd) -> Result<ChildGuard>;
}

/// Executor that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn capture(&self, cmd: &Cmd) -> Result<CommandResult> {
        let output = cmd
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(cmd, e))?;

        Ok(CommandResult {
            status: exit_status(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn interactive(&self, cmd: &Cmd) -> Result<CommandResult> {
        let child = cmd
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_error(cmd, e))?;

        let status = ChildGuard::new(child)
            .wait()
            .map_err(|e| Error::io(format!("waiting for `{}`", cmd.display()), e))?;

        Ok(CommandResult {
            status: exit_status(status),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    fn spawn_piped(&self, cmd: &Cmd) -> Result<ChildGuard> {
        let child = cmd
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_error(cmd, e))?;
        Ok(ChildGuard::new(child))
    }
}

/// Owns a spawned child and kills and reaps it if dropped before it was
/// waited on.
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Block until the child exits.
    pub fn wait(mut self) -> io::Result<std::process::ExitStatus> {
        match self.child.take() {
            Some(mut child) => child.wait(),
            None => Err(io::Error::other("child already reaped")),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Locate a program on `PATH`.
pub fn which(program: impl AsRef<OsStr>) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Check if a program is on `PATH`.
pub fn exists(program: impl AsRef<OsStr>) -> bool {
    which(program).is_some()
}

fn spawn_error(cmd: &Cmd, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        return Error::MissingDependency {
            what: format!("program `{}`", cmd.program.to_string_lossy()),
            path: PathBuf::from(&cmd.program),
        };
    }
    Error::io(format!("failed to spawn `{}`", cmd.display()), err)
}

pub(crate) fn exit_status(status: std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitStatus::Signal(sig);
        }
    }
    ExitStatus::Code(1)
}
