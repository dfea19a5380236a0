//! The ChaOS pipeline.
//!
//! | Stage           | Does                                     | After                       |
//! |-----------------|------------------------------------------|-----------------------------|
//! | format          | `cargo fmt` in `os/`                     |                             |
//! | build-user      | `make elf` in `user/`                    | format                      |
//! | build-kernel    | `make build` in `os/`                    | format, build-user          |
//! | place-artifacts | `sbi-qemu`, `kernel-qemu`                | build-kernel                |
//! | build-all       |                                          | place-artifacts             |
//! | provision-image | `sdcard.img.gz` -> `sdcard.img`          |                             |
//! | run             | boot QEMU                                | build-all, provision-image  |
//! | smoke           | headless boot check                      | build-all, provision-image  |
//! | clean           | remove artifacts, `make clean` in `os/`  |                             |
//! | build-sandbox   | `docker build`                           |                             |
//! | enter-sandbox   | `docker run -it`                         |                             |

use std::path::PathBuf;

use crate::config::Workspace;
use crate::error::Result;
use crate::process::Cmd;

use super::{Op, Stage, StageGraph};

pub mod targets {
    pub const FORMAT: &str = "format";
    pub const BUILD_USER: &str = "build-user";
    pub const BUILD_KERNEL: &str = "build-kernel";
    pub const PLACE_ARTIFACTS: &str = "place-artifacts";
    pub const BUILD_ALL: &str = "build-all";
    pub const PROVISION_IMAGE: &str = "provision-image";
    pub const RUN: &str = "run";
    pub const SMOKE: &str = "smoke";
    pub const CLEAN: &str = "clean";
    pub const BUILD_SANDBOX: &str = "build-sandbox";
    pub const ENTER_SANDBOX: &str = "enter-sandbox";
}

use targets::*;

/// Build the stage graph for a workspace. Fails if any target does not
/// resolve.
pub fn pipeline(ws: &Workspace) -> Result<StageGraph> {
    let paths = &ws.config().paths;
    let kernel_dir = ws.kernel_dir();
    let user_dir = ws.user_dir();

    let mut graph = StageGraph::new();

    graph.add(Stage::new(
        FORMAT,
        "Reformat kernel sources in place",
        Op::Commands(vec![Cmd::new("cargo").arg("fmt").current_dir(&kernel_dir)]),
    ))?;

    graph.add(
        Stage::new(
            BUILD_USER,
            "Build user-space programs to ELF",
            Op::Commands(vec![Cmd::new("make").arg("elf").current_dir(&user_dir)]),
        )
        .after(&[FORMAT])
        .fresh_when(vec![paths.user_dir.clone()], vec![ws.user_output_rel()]),
    )?;

    // The kernel image embeds the user programs, so user sources are
    // inputs here too.
    graph.add(
        Stage::new(
            BUILD_KERNEL,
            "Build the kernel binary",
            Op::Commands(vec![Cmd::new("make").arg("build").current_dir(&kernel_dir)]),
        )
        .after(&[FORMAT, BUILD_USER])
        .fresh_when(
            vec![paths.kernel_dir.clone(), paths.user_dir.clone()],
            vec![ws.kernel_source_rel()],
        ),
    )?;

    graph.add(
        Stage::new(
            PLACE_ARTIFACTS,
            "Copy firmware and kernel to their normalized names",
            Op::PlaceArtifacts,
        )
        .after(&[BUILD_KERNEL]),
    )?;

    graph.add(
        Stage::new(
            BUILD_ALL,
            "Format, build user-space and kernel, place artifacts",
            Op::Group,
        )
        .after(&[PLACE_ARTIFACTS]),
    )?;

    graph.add(Stage::new(
        PROVISION_IMAGE,
        "Decompress the storage image if absent",
        Op::ProvisionImage,
    ))?;

    graph.add(
        Stage::new(RUN, "Build everything and boot QEMU", Op::Launch)
            .after(&[BUILD_ALL, PROVISION_IMAGE]),
    )?;

    graph.add(
        Stage::new(SMOKE, "Build everything and check the VM boots", Op::SmokeTest)
            .after(&[BUILD_ALL, PROVISION_IMAGE]),
    )?;

    graph.add(Stage::new(
        CLEAN,
        "Remove normalized artifacts and the decompressed image",
        Op::Clean(vec![Cmd::new("make").arg("clean").current_dir(&kernel_dir)]),
    ))?;

    graph.add(Stage::new(
        BUILD_SANDBOX,
        "Build the toolchain container image",
        Op::BuildSandbox,
    ))?;

    graph.add(Stage::new(
        ENTER_SANDBOX,
        "Open a shell in the toolchain container",
        Op::EnterSandbox,
    ))?;

    graph.validate()?;
    Ok(graph)
}

/// Files removed by `clean`, before the nested toolchain's own cleanup.
pub fn clean_targets(ws: &Workspace) -> Vec<PathBuf> {
    vec![ws.firmware(), ws.kernel(), ws.image()]
}
