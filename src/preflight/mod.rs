//! Preflight checks for ChaOS build prerequisites.
//!
//! Validates host tools and workspace inputs BEFORE any nested toolchain
//! is invoked, so a missing `make` or firmware blob is reported up front
//! instead of halfway through a build.
//!
//! # Checks Performed
//!
//! - **Host tools**: cargo, rustfmt, make, the emulator, the container runtime
//! - **Inputs**: kernel and user trees, firmware binary, storage archive
//! - **Artifacts**: reports which generated files already exist
//!
//! # Usage
//!
//! ```rust,ignore
//! use chaos_builder::preflight::PreflightChecker;
//!
//! let report = PreflightChecker::new(&workspace).run_all();
//! report.print_summary();
//! if !report.is_ok() {
//!     std::process::exit(1);
//! }
//! ```

mod host_tools;
mod inputs;

pub use host_tools::check_host_tools;
pub use inputs::check_inputs;

use std::fs;
use std::path::PathBuf;

use crate::config::Workspace;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Passed, but with a note worth reading
    pub warning: bool,
    /// Human-readable message
    pub message: String,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl CheckResult {
    /// Create a passing check result.
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            warning: false,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Create a failing check result.
    pub fn fail(
        name: impl Into<String>,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            passed: false,
            warning: false,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Create a warning check result (passes but with a note).
    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            warning: true,
            ..Self::pass(name, message)
        }
    }
}

/// Comprehensive preflight report.
#[derive(Debug, Default)]
pub struct PreflightReport {
    /// All check results
    pub checks: Vec<CheckResult>,
    /// Generated files found
    pub artifacts: ArtifactStatus,
}

impl PreflightReport {
    /// Check if all preflight checks passed.
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Get all failing checks.
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    pub fn total_count(&self) -> usize {
        self.checks.len()
    }

    pub fn print_summary(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let status = match (check.passed, check.warning) {
                (false, _) => "[FAIL]",
                (true, true) => "[WARN]",
                (true, false) => "[OK]",
            };
            println!("{} {}: {}", status, check.name, check.message);
            if let Some(suggestion) = &check.suggestion {
                println!("     Suggestion: {}", suggestion);
            }
        }

        println!();
        println!("=== Artifacts ===\n");
        self.artifacts.print();

        println!();
        if self.is_ok() {
            println!(
                "All preflight checks passed ({}/{})",
                self.passed_count(),
                self.total_count()
            );
        } else {
            println!(
                "Preflight checks failed: {} of {} passed",
                self.passed_count(),
                self.total_count()
            );
        }
    }
}

/// One file the pipeline reads or produces.
#[derive(Debug, Clone)]
pub struct FileStatus {
    pub label: &'static str,
    pub path: PathBuf,
    /// Size in bytes, `None` when absent.
    pub size: Option<u64>,
}

impl FileStatus {
    fn probe(label: &'static str, path: PathBuf) -> Self {
        let size = fs::metadata(&path).ok().filter(|m| m.is_file()).map(|m| m.len());
        Self { label, path, size }
    }

    pub fn present(&self) -> bool {
        self.size.is_some()
    }
}

/// Presence of inputs and generated artifacts.
#[derive(Debug, Default)]
pub struct ArtifactStatus {
    pub inputs: Vec<FileStatus>,
    pub outputs: Vec<FileStatus>,
}

impl ArtifactStatus {
    pub fn collect(ws: &Workspace) -> Self {
        Self {
            inputs: vec![
                FileStatus::probe("Firmware source", ws.firmware_source()),
                FileStatus::probe("Storage archive", ws.image_archive()),
            ],
            outputs: vec![
                FileStatus::probe("Kernel build", ws.kernel_source()),
                FileStatus::probe("Firmware", ws.firmware()),
                FileStatus::probe("Kernel", ws.kernel()),
                FileStatus::probe("Storage image", ws.image()),
            ],
        }
    }

    pub fn print(&self) {
        for file in self.inputs.iter().chain(&self.outputs) {
            let status = match file.size {
                Some(size) => format!("[present] {}", human_size(size)),
                None => "[missing]".to_string(),
            };
            println!("  {:<16} {:<20} {}", file.label, status, file.path.display());
        }
    }

    /// Ready to boot without building anything.
    pub fn bootable(&self) -> bool {
        self.outputs.iter().skip(1).all(FileStatus::present)
    }
}

/// `512 B`, `12 KB`, `3 MB`.
pub fn human_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MB", bytes / 1024 / 1024)
    } else if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

/// Preflight checker for ChaOS build prerequisites.
pub struct PreflightChecker<'a> {
    workspace: &'a Workspace,
}

impl<'a> PreflightChecker<'a> {
    pub fn new(workspace: &'a Workspace) -> Self {
        Self { workspace }
    }

    /// Run all preflight checks and return a comprehensive report.
    pub fn run_all(&self) -> PreflightReport {
        let mut report = PreflightReport::default();
        report.checks.extend(check_host_tools(self.workspace));
        report.checks.extend(check_inputs(self.workspace));
        report.artifacts = ArtifactStatus::collect(self.workspace);
        report
    }
}
