//! ChaOS builder CLI
//!
//! Builds the ChaOS kernel and user programs, places the boot artifacts
//! under their normalized names and boots them in QEMU (RISC-V `virt`).
//!
//! # Usage
//!
//! ```bash
//! # Show what exists and what is missing
//! chaos-builder status
//!
//! # Format, build user-space and kernel, place sbi-qemu and kernel-qemu
//! chaos-builder build-all
//!
//! # Build everything, decompress sdcard.img and boot
//! chaos-builder run
//!
//! # Headless boot check (CI)
//! chaos-builder smoke --timeout 60
//!
//! # Toolchain container
//! DOCKER_NAME=chaos-toolchain chaos-builder build-sandbox
//! chaos-builder enter-sandbox
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use chaos_builder::preflight::{human_size, ArtifactStatus, PreflightChecker};
use chaos_builder::process::SystemExecutor;
use chaos_builder::stage::{pipeline, targets, Runner, StageContext};
use chaos_builder::{logging, Workspace};

#[derive(Parser)]
#[command(name = "chaos-builder")]
#[command(author, version, about = "ChaOS build and boot orchestrator", long_about = None)]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Container image tag for the sandbox commands
    #[arg(long, global = true, env = "DOCKER_NAME", value_name = "TAG")]
    image: Option<String>,

    /// Rebuild stages even when their inputs are unchanged
    #[arg(long, global = true)]
    force: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the toolchain container image
    BuildSandbox,

    /// Open an interactive shell in the toolchain container
    EnterSandbox,

    /// Run cargo fmt on the kernel sources
    Format,

    /// Format, build user-space and kernel, place artifacts
    BuildAll,

    /// Decompress sdcard.img.gz if sdcard.img is absent
    ProvisionImage,

    /// Build everything and boot the VM
    Run,

    /// Remove placed artifacts and the decompressed image
    Clean,

    /// Build everything and check the VM boots (headless, automated)
    Smoke {
        /// Timeout in seconds (default: 120)
        #[arg(short, long, default_value = "120")]
        timeout: u64,
    },

    /// Print the stages a target would run
    Plan {
        /// Target stage name (e.g. run, build-all)
        target: String,
    },

    /// Show inputs and build artifacts
    Status,

    /// Check host tools and workspace inputs
    Preflight,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match dispatch(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => ExitCode::from(report(&e)),
    }
}

fn dispatch(cli: &Cli) -> Result<u8> {
    let ws = open_workspace(cli)?;

    match &cli.command {
        Commands::BuildSandbox => cmd_target(cli, &ws, targets::BUILD_SANDBOX, None),
        Commands::EnterSandbox => cmd_target(cli, &ws, targets::ENTER_SANDBOX, None),
        Commands::Format => cmd_target(cli, &ws, targets::FORMAT, None),
        Commands::BuildAll => cmd_target(cli, &ws, targets::BUILD_ALL, None),
        Commands::ProvisionImage => cmd_target(cli, &ws, targets::PROVISION_IMAGE, None),
        Commands::Run => cmd_target(cli, &ws, targets::RUN, None),
        Commands::Clean => cmd_target(cli, &ws, targets::CLEAN, None),
        Commands::Smoke { timeout } => {
            cmd_target(cli, &ws, targets::SMOKE, Some(Duration::from_secs(*timeout)))
        }
        Commands::Plan { target } => cmd_plan(cli, &ws, target),
        Commands::Status => cmd_status(&ws),
        Commands::Preflight => cmd_preflight(&ws),
    }
}

fn open_workspace(cli: &Cli) -> Result<Workspace> {
    let root = cli.workspace.clone().unwrap_or_else(|| PathBuf::from("."));
    Workspace::open(&root).with_context(|| format!("opening workspace {}", root.display()))
}

/// `--image`, then `DOCKER_NAME` (both via clap), then the config file.
fn image_tag(cli: &Cli, ws: &Workspace) -> String {
    cli.image
        .clone()
        .unwrap_or_else(|| ws.config().sandbox.image.clone())
}

fn cmd_target(
    cli: &Cli,
    ws: &Workspace,
    target: &str,
    smoke_timeout: Option<Duration>,
) -> Result<u8> {
    let executor = SystemExecutor;
    let mut ctx = StageContext::new(ws, &executor, image_tag(cli, ws));
    if let Some(timeout) = smoke_timeout {
        ctx = ctx.with_smoke_timeout(timeout);
    }

    let graph = pipeline(ws)?;
    let report = Runner::new(ctx).force(cli.force).run(&graph, target)?;
    debug!(executed = ?report.executed, skipped = ?report.skipped, "{} done", target);
    Ok(0)
}

fn cmd_plan(cli: &Cli, ws: &Workspace, target: &str) -> Result<u8> {
    let executor = SystemExecutor;
    let ctx = StageContext::new(ws, &executor, image_tag(cli, ws));
    let graph = pipeline(ws)?;
    let plan = Runner::new(ctx).force(cli.force).plan(&graph, target)?;

    println!("Plan for '{}':", target);
    for (i, stage) in plan.iter().enumerate() {
        let mark = if stage.fresh { "[SKIP]" } else { "[RUN] " };
        println!("  {:>2}. {} {:<16} {}", i + 1, mark, stage.name, stage.description);
    }
    Ok(0)
}

fn cmd_status(ws: &Workspace) -> Result<u8> {
    let status = ArtifactStatus::collect(ws);

    println!("ChaOS Builder Status");
    println!("====================");
    println!();
    println!("Workspace: {}", ws.root().display());
    println!("Emulator:  {}", ws.config().emulator.binary.display());
    println!("Sandbox:   {}", ws.config().sandbox.image);
    println!();

    println!("Inputs:");
    print_files(&status.inputs);
    println!();
    println!("Build Artifacts:");
    print_files(&status.outputs);
    println!();

    println!("Next steps:");
    let firmware_source = &status.inputs[0];
    if !firmware_source.present() {
        println!("  1. Provide the SBI firmware at {}", firmware_source.path.display());
    } else if !status.bootable() {
        println!("  1. Run 'chaos-builder run' to build and boot");
    } else {
        println!("  Artifacts ready! Run 'chaos-builder run' to boot in QEMU.");
    }
    Ok(0)
}

fn print_files(files: &[chaos_builder::preflight::FileStatus]) {
    for file in files {
        let label = format!("{}:", file.label);
        match file.size {
            Some(size) => println!("  {:<16} PRESENT ({})", label, human_size(size)),
            None => println!("  {:<16} MISSING ({})", label, file.path.display()),
        }
    }
}

fn cmd_preflight(ws: &Workspace) -> Result<u8> {
    let report = PreflightChecker::new(ws).run_all();
    report.print_summary();
    Ok(if report.is_ok() { 0 } else { 1 })
}

/// Print an error and pick the exit code.
///
/// A failing nested tool has already explained itself on the terminal, so
/// only its status is propagated.
fn report(e: &anyhow::Error) -> u8 {
    if let Some(status) = e
        .downcast_ref::<chaos_builder::Error>()
        .and_then(chaos_builder::Error::process_status)
    {
        debug!("{:#}", e);
        return exit_byte(status.exit_code());
    }
    eprintln!("Error: {:#}", e);
    1
}

/// Exit statuses outside 1..=255 still have to read as failures.
fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).ok().filter(|&c| c != 0).unwrap_or(1)
}
