//! Host tool validation.
//!
//! The nested toolchains need cargo, rustfmt and make; `run` and `smoke`
//! need the emulator. The container runtime only matters for the sandbox
//! stages, so its absence is a warning.

use super::CheckResult;
use crate::config::Workspace;
use crate::process::{exists, which};
use crate::qemu::EmulatorConfig;

/// Required host tools with their install suggestions.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("cargo", "Build kernel and user programs", "https://rustup.rs"),
    ("rustfmt", "Format kernel sources", "rustup component add rustfmt"),
    ("make", "Drive the nested builds", "sudo apt install make"),
];

/// Check every host tool the pipeline may invoke.
pub fn check_host_tools(ws: &Workspace) -> Vec<CheckResult> {
    let mut results: Vec<CheckResult> = REQUIRED_TOOLS
        .iter()
        .map(|(tool, purpose, install)| check_tool(tool, purpose, install))
        .collect();
    results.push(check_emulator(ws));
    results.push(check_runtime(&ws.config().sandbox.runtime));
    results
}

fn check_tool(tool: &str, purpose: &str, install_cmd: &str) -> CheckResult {
    match which(tool) {
        Some(path) => CheckResult::pass(
            format!("{} tool", tool),
            format!("Found at {} ({})", path.display(), purpose),
        ),
        None => CheckResult::fail(
            format!("{} tool", tool),
            format!("Not found (needed for: {})", purpose),
            install_cmd,
        ),
    }
}

fn check_emulator(ws: &Workspace) -> CheckResult {
    let config = EmulatorConfig::from_workspace(ws);
    match config.resolve_emulator() {
        Some(path) => CheckResult::pass("emulator", format!("Found at {}", path.display())),
        None => CheckResult::fail(
            "emulator",
            format!("{} not found", config.emulator.display()),
            "sudo apt install qemu-system-misc",
        ),
    }
}

fn check_runtime(runtime: &str) -> CheckResult {
    if exists(runtime) {
        CheckResult::pass("container runtime", format!("{} available", runtime))
    } else {
        CheckResult::warn(
            "container runtime",
            format!("{} not found; build-sandbox and enter-sandbox will fail", runtime),
        )
    }
}
