//! Containerized toolchain environment.
//!
//! `build-sandbox` builds the toolchain image from the workspace
//! Dockerfile; `enter-sandbox` drops into a shell with the workspace
//! mounted at `/mnt`. Neither is a prerequisite of any other stage.

use std::path::PathBuf;

use tracing::info;

use crate::config::Workspace;
use crate::error::{Error, Result};
use crate::process::{Cmd, Executor};

#[derive(Debug, Clone)]
pub struct Sandbox {
    workspace: PathBuf,
    recipe: PathBuf,
    mount_point: String,
    runtime: String,
    shell: String,
}

impl Sandbox {
    pub fn from_workspace(ws: &Workspace) -> Self {
        let sandbox = &ws.config().sandbox;
        Self {
            workspace: ws.root().to_path_buf(),
            recipe: ws.recipe(),
            mount_point: sandbox.mount_point.clone(),
            runtime: sandbox.runtime.clone(),
            shell: sandbox.shell.clone(),
        }
    }

    pub fn build_command(&self, image: &str) -> Cmd {
        Cmd::new(&self.runtime)
            .current_dir(&self.workspace)
            .args(["build", "-t", image, "-f"])
            .arg_path(&self.recipe)
            .arg(".")
    }

    pub fn enter_command(&self, image: &str) -> Cmd {
        let volume = format!("{}:{}", self.workspace.display(), self.mount_point);
        Cmd::new(&self.runtime)
            .current_dir(&self.workspace)
            .args(["run", "--rm", "-it", "-v", &volume, "-w", &self.mount_point])
            .arg(image)
            .arg(&self.shell)
    }

    /// Build the container image tagged `image`.
    pub fn build(&self, image: &str, executor: &dyn Executor) -> Result<()> {
        if !self.recipe.is_file() {
            return Err(Error::MissingDependency {
                what: "container recipe".to_string(),
                path: self.recipe.clone(),
            });
        }
        info!(image, recipe = %self.recipe.display(), "building toolchain image");
        self.build_command(image).run_interactive(executor)?;
        Ok(())
    }

    /// Start an interactive shell in the container; returns when it exits.
    pub fn enter(&self, image: &str, executor: &dyn Executor) -> Result<()> {
        info!(image, mount = %self.mount_point, "entering sandbox");
        self.enter_command(image).run_interactive(executor)?;
        Ok(())
    }
}
