//! Recording executor for tests.
//!
//! Never spawns a process. Exit codes are scripted by substring match on
//! the rendered command line, and side effects stand in for the files a
//! real toolchain would write. Piped spawns run a scripted `sh -c` console
//! in place of the real program.

use std::cell::RefCell;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::{ChildGuard, Cmd, CommandResult, Executor};
use crate::error::{Error, ExitStatus, Result};

#[derive(Debug, Clone)]
pub struct Invocation {
    pub line: String,
    pub cwd: Option<PathBuf>,
    pub interactive: bool,
}

type Effect = Box<dyn Fn(&Cmd)>;

#[derive(Default)]
pub struct FakeExecutor {
    calls: RefCell<Vec<Invocation>>,
    exits: Vec<(String, i32)>,
    effects: Vec<(String, Effect)>,
    missing: Vec<String>,
    consoles: Vec<(String, String)>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands whose line contains `pattern` exit with `code`.
    pub fn fail_on(mut self, pattern: &str, code: i32) -> Self {
        self.exits.push((pattern.to_string(), code));
        self
    }

    /// Run `effect` whenever a successful command's line contains `pattern`.
    pub fn on(mut self, pattern: &str, effect: impl Fn(&Cmd) + 'static) -> Self {
        self.effects.push((pattern.to_string(), Box::new(effect)));
        self
    }

    /// Behave as if `program` is not installed.
    pub fn missing_program(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    /// Piped spawns whose line contains `pattern` run `script` under `sh -c`
    /// and stream its stdout.
    pub fn console(mut self, pattern: &str, script: &str) -> Self {
        self.consoles.push((pattern.to_string(), script.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.line.clone()).collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.count(pattern) > 0
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.line.contains(pattern))
            .count()
    }

    fn record(&self, cmd: &Cmd, interactive: bool) -> Result<CommandResult> {
        let line = cmd.display();
        self.calls.borrow_mut().push(Invocation {
            line: line.clone(),
            cwd: cmd.cwd().map(PathBuf::from),
            interactive,
        });

        let program = cmd.program().to_string_lossy();
        if self.missing.iter().any(|m| *m == program) {
            return Err(Error::MissingDependency {
                what: format!("program `{}`", program),
                path: PathBuf::from(program.as_ref()),
            });
        }

        let code = self
            .exits
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map_or(0, |(_, code)| *code);

        if code == 0 {
            for (pattern, effect) in &self.effects {
                if line.contains(pattern.as_str()) {
                    effect(cmd);
                }
            }
        }

        Ok(CommandResult {
            status: ExitStatus::Code(code),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

impl Executor for FakeExecutor {
    fn capture(&self, cmd: &Cmd) -> Result<CommandResult> {
        self.record(cmd, false)
    }

    fn interactive(&self, cmd: &Cmd) -> Result<CommandResult> {
        self.record(cmd, true)
    }

    fn spawn_piped(&self, cmd: &Cmd) -> Result<ChildGuard> {
        let result = self.record(cmd, false)?;
        let line = cmd.display();
        let script = self
            .consoles
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map_or_else(
                || format!("exit {}", result.status.exit_code()),
                |(_, script)| script.clone(),
            );
        let child = Command::new("sh")
            .args(["-c", &script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::io("spawning scripted console", e))?;
        Ok(ChildGuard::new(child))
    }
}
