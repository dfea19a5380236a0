//! End-to-end pipeline behavior against a scratch workspace.
//!
//! The fake executor stands in for cargo, make and QEMU. Its effects write
//! the files the real toolchains would: `make build` emits the kernel
//! binary from the current kernel source, `make elf` creates the user
//! output directory.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::{Config, Workspace};
use crate::error::Error;
use crate::image::write_gz;
use crate::process::fake::FakeExecutor;
use crate::stage::{pipeline, targets, RunReport, Runner, StageContext};

const KERNEL_OUT: &str = "os/target/riscv64gc-unknown-none-elf/release/os.bin";
const USER_OUT: &str = "user/target/riscv64gc-unknown-none-elf/release";
const FIRMWARE: &[u8] = b"rustsbi firmware blob";
const IMAGE: &[u8] = b"sdcard contents";

struct Fixture {
    dir: TempDir,
    ws: Workspace,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["os/src", "user/src/bin", "bootloader", "bin"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("os/Makefile"), "build:\n").unwrap();
        fs::write(root.join("os/src/main.rs"), "kernel v1").unwrap();
        fs::write(root.join("user/Makefile"), "elf:\n").unwrap();
        fs::write(root.join("user/src/bin/initproc.rs"), "fn main() {}").unwrap();
        fs::write(root.join("bootloader/rustsbi-qemu.bin"), FIRMWARE).unwrap();
        fs::write(root.join("bin/qemu-system-riscv64"), "#!/bin/sh\n").unwrap();
        write_gz(&root.join("sdcard.img.gz"), IMAGE);

        let mut config = Config::default();
        config.emulator.binary = PathBuf::from("bin/qemu-system-riscv64");
        let ws = Workspace::with_config(root, config);
        Self { dir, ws }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Fake toolchain that produces real outputs.
    fn toolchain(&self) -> FakeExecutor {
        let root = self.root().to_path_buf();
        let kernel_root = root.clone();
        let clean_root = root.clone();
        FakeExecutor::new()
            .on("make elf", move |_| {
                let out = root.join(USER_OUT);
                fs::create_dir_all(&out).unwrap();
                fs::write(out.join("initproc"), b"\x7fELF").unwrap();
            })
            .on("make build", move |_| {
                let source = fs::read(kernel_root.join("os/src/main.rs")).unwrap();
                let out = kernel_root.join(KERNEL_OUT);
                fs::create_dir_all(out.parent().unwrap()).unwrap();
                fs::write(out, source).unwrap();
            })
            .on("make clean", move |_| {
                let _ = fs::remove_dir_all(clean_root.join("os/target"));
            })
    }

    fn run(&self, exec: &FakeExecutor, target: &str) -> crate::error::Result<RunReport> {
        self.run_with(exec, target, false)
    }

    fn run_with(
        &self,
        exec: &FakeExecutor,
        target: &str,
        force: bool,
    ) -> crate::error::Result<RunReport> {
        let graph = pipeline(&self.ws)?;
        Runner::new(StageContext::new(&self.ws, exec, "chaos-toolchain"))
            .force(force)
            .run(&graph, target)
    }
}

#[test]
fn test_run_invokes_stages_in_order() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::RUN).unwrap();

    let lines = exec.lines();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "cargo fmt");
    assert_eq!(lines[1], "make elf");
    assert_eq!(lines[2], "make build");
    assert!(lines[3].starts_with("bin/qemu-system-riscv64 -machine virt -kernel kernel-qemu"));

    let calls = exec.calls();
    assert_eq!(calls[0].cwd.as_deref(), Some(fx.path("os").as_path()));
    assert_eq!(calls[1].cwd.as_deref(), Some(fx.path("user").as_path()));
    assert_eq!(calls[3].cwd.as_deref(), Some(fx.root()));
}

#[test]
fn test_build_all_places_both_artifacts() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();

    assert_eq!(fs::read(fx.path("sbi-qemu")).unwrap(), FIRMWARE);
    assert_eq!(fs::read(fx.path("kernel-qemu")).unwrap(), b"kernel v1");
    // build-all alone never touches the storage image.
    assert!(!fx.path("sdcard.img").exists());
}

#[test]
fn test_run_provisions_image_before_launch() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::RUN).unwrap();

    assert_eq!(fs::read(fx.path("sdcard.img")).unwrap(), IMAGE);
}

#[test]
fn test_kernel_failure_stops_pipeline() {
    let fx = Fixture::new();
    let exec = fx.toolchain().fail_on("make build", 2);

    let err = fx.run(&exec, targets::RUN).unwrap_err();

    assert!(matches!(err, Error::BuildFailure { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.path("sbi-qemu").exists());
    assert!(!fx.path("kernel-qemu").exists());
    assert!(!fx.path("sdcard.img").exists());
    assert!(!exec.ran("qemu-system-riscv64"));
}

#[test]
fn test_user_failure_skips_kernel_build() {
    let fx = Fixture::new();
    let exec = fx.toolchain().fail_on("make elf", 1);

    let err = fx.run(&exec, targets::BUILD_ALL).unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert!(!exec.ran("make build"));
}

#[test]
fn test_rebuild_overwrites_artifacts() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();
    fs::write(fx.path("os/src/main.rs"), "kernel v2").unwrap();
    fx.run(&exec, targets::BUILD_ALL).unwrap();

    assert_eq!(fs::read(fx.path("kernel-qemu")).unwrap(), b"kernel v2");
    assert_eq!(exec.count("make build"), 2);
}

#[test]
fn test_unchanged_sources_skip_nested_builds() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();
    let report = fx.run(&exec, targets::BUILD_ALL).unwrap();

    assert_eq!(report.skipped, vec![targets::BUILD_USER, targets::BUILD_KERNEL]);
    assert_eq!(exec.count("cargo fmt"), 2);
    assert_eq!(exec.count("make elf"), 1);
    assert_eq!(exec.count("make build"), 1);
    // Placement is not skippable.
    assert!(report.executed.iter().any(|s| s == targets::PLACE_ARTIFACTS));
}

#[test]
fn test_user_change_rebuilds_kernel() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();
    fs::write(fx.path("user/src/bin/initproc.rs"), "fn main() { exit(0) }").unwrap();
    fx.run(&exec, targets::BUILD_ALL).unwrap();

    assert_eq!(exec.count("make elf"), 2);
    assert_eq!(exec.count("make build"), 2);
}

#[test]
fn test_replaced_kernel_output_rebuilds() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();
    // A build from other sources lands at the output path behind our back.
    fs::write(fx.path(KERNEL_OUT), "kernel v2").unwrap();
    let report = fx.run(&exec, targets::BUILD_ALL).unwrap();

    assert_eq!(report.skipped, vec![targets::BUILD_USER]);
    assert_eq!(exec.count("make build"), 2);
    assert_eq!(fs::read(fx.path("kernel-qemu")).unwrap(), b"kernel v1");
}

#[test]
fn test_force_runs_everything() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();
    let report = fx.run_with(&exec, targets::BUILD_ALL, true).unwrap();

    assert!(report.skipped.is_empty());
    assert_eq!(exec.count("make build"), 2);
}

#[test]
fn test_existing_image_is_kept() {
    let fx = Fixture::new();
    let exec = fx.toolchain();
    fs::write(fx.path("sdcard.img"), b"operator data").unwrap();

    fx.run(&exec, targets::PROVISION_IMAGE).unwrap();

    assert_eq!(fs::read(fx.path("sdcard.img")).unwrap(), b"operator data");
}

#[test]
fn test_corrupt_archive_blocks_launch() {
    let fx = Fixture::new();
    let exec = fx.toolchain();
    fs::write(fx.path("sdcard.img.gz"), b"not gzip at all").unwrap();

    let err = fx.run(&exec, targets::RUN).unwrap_err();

    assert!(matches!(err, Error::DecompressionFailure { .. }));
    assert_eq!(err.exit_code(), 1);
    assert!(!exec.ran("qemu-system-riscv64"));
    assert!(!fx.path("sdcard.img").exists());
}

#[test]
fn test_missing_archive_blocks_launch() {
    let fx = Fixture::new();
    let exec = fx.toolchain();
    fs::remove_file(fx.path("sdcard.img.gz")).unwrap();

    let err = fx.run(&exec, targets::RUN).unwrap_err();

    assert!(matches!(err, Error::DecompressionFailure { .. }));
    assert!(!exec.ran("qemu-system-riscv64"));
    assert!(!fx.path("sdcard.img").exists());
}

#[test]
fn test_missing_cargo_stops_before_any_build() {
    let fx = Fixture::new();
    let exec = fx.toolchain().missing_program("cargo");

    let err = fx.run(&exec, targets::BUILD_ALL).unwrap_err();

    assert!(matches!(err, Error::MissingDependency { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(exec.lines(), vec!["cargo fmt"]);
    assert!(!fx.path("kernel-qemu").exists());
}

#[test]
fn test_smoke_surfaces_emulator_status() {
    let fx = Fixture::new();
    let exec = fx.toolchain().console("qemu-system-riscv64", "echo '[rustsbi] start'; exit 7");

    let err = fx.run(&exec, targets::SMOKE).unwrap_err();

    assert!(matches!(err, Error::EmulatorExit { .. }));
    assert_eq!(err.exit_code(), 7);
    assert!(exec.ran("make build"));
}

#[test]
fn test_smoke_passes_on_banner() {
    let fx = Fixture::new();
    let exec = fx
        .toolchain()
        .console("qemu-system-riscv64", "echo 'All tasks finished successfully!'");

    let report = fx.run(&exec, targets::SMOKE).unwrap();

    assert_eq!(report.executed.last().map(String::as_str), Some(targets::SMOKE));
    assert_eq!(fs::read(fx.path("sdcard.img")).unwrap(), IMAGE);
}

#[test]
fn test_missing_firmware_places_nothing() {
    let fx = Fixture::new();
    let exec = fx.toolchain();
    fs::remove_file(fx.path("bootloader/rustsbi-qemu.bin")).unwrap();

    let err = fx.run(&exec, targets::BUILD_ALL).unwrap_err();

    assert!(matches!(err, Error::MissingArtifact { .. }));
    assert!(!fx.path("kernel-qemu").exists());
}

#[test]
fn test_clean_removes_exactly_generated_files() {
    let fx = Fixture::new();
    let exec = fx.toolchain();
    fx.run(&exec, targets::RUN).unwrap();

    fx.run(&exec, targets::CLEAN).unwrap();

    for gone in ["sbi-qemu", "kernel-qemu", "sdcard.img", "os/target"] {
        assert!(!fx.path(gone).exists(), "{} should be removed", gone);
    }
    for kept in [
        "sdcard.img.gz",
        "bootloader/rustsbi-qemu.bin",
        "os/src/main.rs",
        "user/src/bin/initproc.rs",
        USER_OUT,
    ] {
        assert!(fx.path(kept).exists(), "{} should be kept", kept);
    }
    let clean = exec.calls().into_iter().find(|c| c.line == "make clean").unwrap();
    assert_eq!(clean.cwd, Some(fx.path("os")));
}

#[test]
fn test_clean_on_fresh_workspace() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::CLEAN).unwrap();

    assert_eq!(exec.lines(), vec!["make clean"]);
}

#[test]
fn test_build_after_clean_rebuilds_kernel() {
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_ALL).unwrap();
    fx.run(&exec, targets::CLEAN).unwrap();
    fx.run(&exec, targets::BUILD_ALL).unwrap();

    assert_eq!(exec.count("make build"), 2);
    assert!(fx.path("kernel-qemu").exists());
}

#[test]
fn test_sandbox_stages_stand_alone() {
    let fx = Fixture::new();
    fs::write(fx.path("Dockerfile"), "FROM ubuntu:22.04\n").unwrap();
    let exec = fx.toolchain();

    fx.run(&exec, targets::BUILD_SANDBOX).unwrap();

    let lines = exec.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("docker build -t chaos-toolchain -f "));
}

#[test]
fn test_emulator_failure_surfaces_status() {
    let fx = Fixture::new();
    let exec = fx.toolchain().fail_on("qemu-system-riscv64", 3);

    let err = fx.run(&exec, targets::RUN).unwrap_err();

    assert!(matches!(err, Error::EmulatorExit { .. }));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_builder_never_changes_directory() {
    let before = std::env::current_dir().unwrap();
    let fx = Fixture::new();
    let exec = fx.toolchain();

    fx.run(&exec, targets::RUN).unwrap();

    assert_eq!(std::env::current_dir().unwrap(), before);
}
