//! ChaOS image builder library.
//!
//! Turns the workspace sources into the three files a RISC-V `virt` VM
//! boots from (`sbi-qemu`, `kernel-qemu`, `sdcard.img`) and launches QEMU
//! on them. The nested cargo/make toolchains do the compiling; this crate
//! orders them, places their outputs and decides what is stale.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod rebuild;
pub mod sandbox;
pub mod stage;
pub mod timing;

#[cfg(test)]
mod pipeline_tests;

pub use config::{Config, Workspace};
pub use error::{Error, Result};
pub use timing::Timer;
