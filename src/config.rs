//! Workspace layout and configuration.
//!
//! All file contracts between the pipeline and the nested toolchains are
//! literal workspace-relative paths. Defaults match the ChaOS tree; an
//! optional `chaos.toml` at the workspace root overrides any of them.
//!
//! # Example
//!
//! ```toml
//! [paths]
//! firmware_source = "bootloader/rustsbi-qemu.bin"
//! image_archive = "sdcard.img.gz"
//!
//! [sandbox]
//! image = "chaos-toolchain"
//! ```
//!
//! The emulator topology (machine, memory, vCPUs, devices) is not
//! configurable; see [`crate::qemu`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, IoContext, Result};

/// Name of the optional configuration file in the workspace root.
pub const CONFIG_FILENAME: &str = "chaos.toml";

/// Container image tag used when none is given.
pub const DEFAULT_IMAGE_TAG: &str = "chaos-toolchain";

/// Compilation target of the kernel and user programs.
pub const DEFAULT_TARGET_TRIPLE: &str = "riscv64gc-unknown-none-elf";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: PathConfig,
    pub toolchain: ToolchainConfig,
    pub emulator: EmulatorSettings,
    pub sandbox: SandboxConfig,
}

/// Persisted file contracts, relative to the workspace root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathConfig {
    /// Bootloader binary produced by the external firmware build.
    pub firmware_source: PathBuf,
    /// Kernel binary at the nested toolchain's output path. Derived from
    /// `kernel_dir` and the target triple when unset.
    pub kernel_source: Option<PathBuf>,
    /// Normalized firmware name read by the launcher.
    pub firmware: PathBuf,
    /// Normalized kernel name read by the launcher.
    pub kernel: PathBuf,
    /// Checked-in compressed storage image.
    pub image_archive: PathBuf,
    /// Decompressed storage image.
    pub image: PathBuf,
    pub kernel_dir: PathBuf,
    pub user_dir: PathBuf,
    /// Staleness stamps.
    pub state_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            firmware_source: PathBuf::from("bootloader/rustsbi-qemu.bin"),
            kernel_source: None,
            firmware: PathBuf::from("sbi-qemu"),
            kernel: PathBuf::from("kernel-qemu"),
            image_archive: PathBuf::from("sdcard.img.gz"),
            image: PathBuf::from("sdcard.img"),
            kernel_dir: PathBuf::from("os"),
            user_dir: PathBuf::from("user"),
            state_dir: PathBuf::from(".chaos"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    pub target_triple: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            target_triple: DEFAULT_TARGET_TRIPLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmulatorSettings {
    /// Program name looked up on `PATH`, or a path to the executable.
    pub binary: PathBuf,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("qemu-system-riscv64"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Fallback container image tag.
    pub image: String,
    /// Container build recipe.
    pub recipe: PathBuf,
    /// Where the workspace is mounted inside the container.
    pub mount_point: String,
    pub runtime: String,
    pub shell: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE_TAG.to_string(),
            recipe: PathBuf::from("Dockerfile"),
            mount_point: "/mnt".to_string(),
            runtime: "docker".to_string(),
            shell: "bash".to_string(),
        }
    }
}

impl Config {
    /// Load `chaos.toml` from `root`, or the defaults if it is absent.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILENAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_io_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text).map_err(|source| Error::Config {
            path,
            source: Box::new(source),
        })
    }

    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// A workspace root plus its configuration. Every path accessor returns
/// an absolute path under the root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    config: Config,
}

impl Workspace {
    /// Open the workspace at `root`, reading `chaos.toml` if present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = fs::canonicalize(&root)
            .with_io_context(|| format!("workspace {}", root.display()))?;
        let config = Config::load(&root)?;
        Ok(Self { root, config })
    }

    pub fn with_config(root: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    pub fn firmware_source(&self) -> PathBuf {
        self.path(&self.config.paths.firmware_source)
    }

    pub fn kernel_source(&self) -> PathBuf {
        self.path(&self.kernel_source_rel())
    }

    /// Relative path of the kernel binary the nested build emits.
    pub fn kernel_source_rel(&self) -> PathBuf {
        match &self.config.paths.kernel_source {
            Some(path) => path.clone(),
            None => self.release_dir(&self.config.paths.kernel_dir).join("os.bin"),
        }
    }

    pub fn firmware(&self) -> PathBuf {
        self.path(&self.config.paths.firmware)
    }

    pub fn kernel(&self) -> PathBuf {
        self.path(&self.config.paths.kernel)
    }

    pub fn image_archive(&self) -> PathBuf {
        self.path(&self.config.paths.image_archive)
    }

    pub fn image(&self) -> PathBuf {
        self.path(&self.config.paths.image)
    }

    pub fn kernel_dir(&self) -> PathBuf {
        self.path(&self.config.paths.kernel_dir)
    }

    pub fn user_dir(&self) -> PathBuf {
        self.path(&self.config.paths.user_dir)
    }

    /// Relative path of the user-space ELF output directory.
    pub fn user_output_rel(&self) -> PathBuf {
        self.release_dir(&self.config.paths.user_dir)
    }

    fn release_dir(&self, crate_dir: &Path) -> PathBuf {
        crate_dir
            .join("target")
            .join(&self.config.toolchain.target_triple)
            .join("release")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path(&self.config.paths.state_dir)
    }

    pub fn recipe(&self) -> PathBuf {
        self.path(&self.config.sandbox.recipe)
    }
}
