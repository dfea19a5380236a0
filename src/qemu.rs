//! QEMU runner for ChaOS.
//!
//! Boots `kernel-qemu` on the RISC-V `virt` machine with RustSBI as BIOS and
//! the sdcard image as a virtio-mmio block device. The topology is fixed:
//!
//! ```text
//! qemu-system-riscv64 -machine virt -kernel kernel-qemu -m 128M -nographic
//!     -smp 2 -bios sbi-qemu
//!     -drive file=sdcard.img,if=none,format=raw,id=x0
//!     -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//!     -device virtio-net-device,netdev=net -netdev user,id=net
//! ```
//!
//! # Testing
//!
//! [`smoke_test`] boots the same machine with the console piped and watches
//! for the kernel's completion banner or a panic.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::Workspace;
use crate::error::{Error, Result};
use crate::process::{self, Cmd, Executor};

pub const MACHINE: &str = "virt";
pub const MEMORY_MIB: u32 = 128;
pub const CPUS: u32 = 2;

/// Printed by the kernel after the last test program exits.
pub const SUCCESS_PATTERNS: &[&str] = &["All tasks finished successfully!"];

/// Any of these on the console means the kernel went down.
pub const FAILURE_PATTERNS: &[&str] = &["Panicked", "panicked at"];

/// No console output for this long counts as a hang.
const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Console lines kept for failure reports.
const TAIL_LINES: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Host user-mode networking; no bridge, no forwarded ports.
    User,
}

/// Everything needed to start the VM. Paths are relative to `workdir`
/// so the emitted command line matches the contract literally.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub emulator: PathBuf,
    pub workdir: PathBuf,
    pub machine: &'static str,
    pub memory_mib: u32,
    pub cpus: u32,
    pub firmware: PathBuf,
    pub kernel: PathBuf,
    pub drive: PathBuf,
    pub network: NetworkMode,
}

impl EmulatorConfig {
    /// The fixed `virt` topology around the given boot files.
    pub fn virt(
        emulator: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        firmware: impl Into<PathBuf>,
        kernel: impl Into<PathBuf>,
        drive: impl Into<PathBuf>,
    ) -> Self {
        Self {
            emulator: emulator.into(),
            workdir: workdir.into(),
            machine: MACHINE,
            memory_mib: MEMORY_MIB,
            cpus: CPUS,
            firmware: firmware.into(),
            kernel: kernel.into(),
            drive: drive.into(),
            network: NetworkMode::User,
        }
    }

    pub fn from_workspace(ws: &Workspace) -> Self {
        let config = ws.config();
        Self::virt(
            &config.emulator.binary,
            ws.root(),
            &config.paths.firmware,
            &config.paths.kernel,
            &config.paths.image,
        )
    }

    /// Full path of the emulator executable, if it can be found.
    pub fn resolve_emulator(&self) -> Option<PathBuf> {
        let looks_like_path = self.emulator.components().count() > 1 || self.emulator.is_absolute();
        if looks_like_path {
            let path = self.workdir.join(&self.emulator);
            return path.is_file().then_some(path);
        }
        process::which(&self.emulator)
    }

    /// Check the emulator and every file the VM will open.
    pub fn validate(&self) -> Result<()> {
        if self.resolve_emulator().is_none() {
            return Err(Error::MissingDependency {
                what: "emulator".to_string(),
                path: self.emulator.clone(),
            });
        }
        let files = [
            ("firmware", &self.firmware),
            ("kernel", &self.kernel),
            ("block device image", &self.drive),
        ];
        for (what, rel) in files {
            let path = self.workdir.join(rel);
            if !path.is_file() {
                return Err(Error::MissingDependency {
                    what: what.to_string(),
                    path,
                });
            }
        }
        Ok(())
    }

    pub fn command(&self) -> Cmd {
        let mut cmd = Cmd::new(&self.emulator)
            .current_dir(&self.workdir)
            .args(["-machine", self.machine])
            .arg("-kernel")
            .arg_path(&self.kernel)
            .args(["-m", &format!("{}M", self.memory_mib)])
            .arg("-nographic")
            .args(["-smp", &self.cpus.to_string()])
            .arg("-bios")
            .arg_path(&self.firmware);

        // Block device on the first virtio-mmio slot
        cmd = cmd.args([
            "-drive",
            &format!("file={},if=none,format=raw,id=x0", self.drive.display()),
            "-device",
            "virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0",
        ]);

        match self.network {
            NetworkMode::User => cmd.args([
                "-device",
                "virtio-net-device,netdev=net",
                "-netdev",
                "user,id=net",
            ]),
        }
    }
}

/// Boot the VM in the foreground and block until it exits.
pub fn launch(config: &EmulatorConfig, executor: &dyn Executor) -> Result<()> {
    config.validate()?;

    info!(
        kernel = %config.kernel.display(),
        bios = %config.firmware.display(),
        drive = %config.drive.display(),
        "starting QEMU ({} vCPUs, {} MiB)",
        config.cpus,
        config.memory_mib
    );

    let result = config.command().allow_fail().run_interactive(executor)?;
    if !result.success() {
        return Err(Error::EmulatorExit {
            status: result.status,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootEvent {
    Finished,
    Panic(String),
}

/// Classify one console line.
pub fn classify(line: &str) -> Option<BootEvent> {
    if let Some(pattern) = FAILURE_PATTERNS.iter().find(|p| line.contains(*p)) {
        return Some(BootEvent::Panic((*pattern).to_string()));
    }
    if SUCCESS_PATTERNS.iter().any(|p| line.contains(p)) {
        return Some(BootEvent::Finished);
    }
    None
}

/// Boot headless, echo the console, and wait for the completion banner.
///
/// Returns the boot time. The VM is killed on every exit path. An emulator
/// that exits nonzero before the banner surfaces as [`Error::EmulatorExit`].
pub fn smoke_test(
    config: &EmulatorConfig,
    executor: &dyn Executor,
    timeout: Duration,
) -> Result<Duration> {
    config.validate()?;

    let mut guard = config.command().spawn_piped(executor)?;
    let stdout = guard
        .child_mut()
        .and_then(|c| c.stdout.take())
        .ok_or_else(|| Error::SmokeTest("emulator stdout not captured".to_string()))?;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines().map_while(std::result::Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let start = Instant::now();
    let mut last_output = Instant::now();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::SmokeTest(format!(
                "timeout after {}s\n\nLast output:\n{}",
                timeout.as_secs(),
                last_lines(&tail, 20)
            )));
        }
        if last_output.elapsed() > STALL_TIMEOUT {
            return Err(Error::SmokeTest(format!(
                "no console output for {}s",
                STALL_TIMEOUT.as_secs()
            )));
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                last_output = Instant::now();
                println!("  {}", line);
                let event = classify(&line);
                if tail.len() == TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
                match event {
                    Some(BootEvent::Finished) => {
                        let elapsed = start.elapsed();
                        info!("boot finished in {:.1}s", elapsed.as_secs_f64());
                        return Ok(elapsed);
                    }
                    Some(BootEvent::Panic(pattern)) => {
                        return Err(Error::SmokeTest(format!(
                            "kernel panic ({})\n\nContext:\n{}",
                            pattern,
                            last_lines(&tail, TAIL_LINES)
                        )));
                    }
                    None => {}
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let status = guard
                    .wait()
                    .map_err(|e| Error::io("waiting for the emulator", e))?;
                let status = process::exit_status(status);
                if !status.success() {
                    return Err(Error::EmulatorExit { status });
                }
                return Err(Error::SmokeTest(format!(
                    "emulator exited before the kernel finished\n\nLast output:\n{}",
                    last_lines(&tail, 20)
                )));
            }
        }
    }
}

fn last_lines(lines: &VecDeque<String>, n: usize) -> String {
    let skip = lines.len().saturating_sub(n);
    lines.iter().skip(skip).cloned().collect::<Vec<_>>().join("\n")
}
