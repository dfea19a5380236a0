//! Stage executor - interprets [`Op`] variants.
//!
//! This is the one place where a stage's operation turns into file
//! operations or process invocations.

use std::fs;
use std::io;

use tracing::{debug, info};

use crate::artifact;
use crate::error::{IoContext, Result};
use crate::image::{self, StorageImage};
use crate::qemu::{self, EmulatorConfig};
use crate::sandbox::Sandbox;

use super::context::StageContext;
use super::definitions::clean_targets;
use super::{Op, Stage};

/// Execute a single stage's operation. Prerequisites are the runner's job.
pub fn execute(ctx: &StageContext<'_>, stage: &Stage) -> Result<()> {
    let ws = ctx.workspace;

    match &stage.op {
        Op::Commands(cmds) => {
            for cmd in cmds {
                info!(stage = %stage.name, "{}", cmd.display());
                cmd.run_interactive(ctx.executor)?;
            }
        }

        Op::PlaceArtifacts => artifact::resolve_all(ws)?,

        Op::ProvisionImage => {
            image::ensure(&StorageImage::from_workspace(ws), &ctx.stamps)?;
        }

        Op::Launch => qemu::launch(&EmulatorConfig::from_workspace(ws), ctx.executor)?,

        Op::SmokeTest => {
            let config = EmulatorConfig::from_workspace(ws);
            qemu::smoke_test(&config, ctx.executor, ctx.smoke_timeout)?;
        }

        Op::Clean(delegate) => {
            for path in clean_targets(ws) {
                match fs::remove_file(&path) {
                    Ok(()) => info!("removed {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("{} already absent", path.display());
                    }
                    Err(e) => {
                        return Err(e).with_io_context(|| format!("removing {}", path.display()));
                    }
                }
            }
            for cmd in delegate {
                cmd.run_interactive(ctx.executor)?;
            }
        }

        Op::BuildSandbox => Sandbox::from_workspace(ws).build(&ctx.image_tag, ctx.executor)?,

        Op::EnterSandbox => Sandbox::from_workspace(ws).enter(&ctx.image_tag, ctx.executor)?,

        Op::Group => {}
    }

    Ok(())
}
