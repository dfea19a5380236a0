//! Artifact resolver.
//!
//! Copies the toolchain outputs into the normalized top-level names the
//! launcher reads:
//!
//! ```text
//! bootloader/rustsbi-qemu.bin                           -> sbi-qemu
//! os/target/riscv64gc-unknown-none-elf/release/os.bin   -> kernel-qemu
//! ```
//!
//! Placement always overwrites (last build wins). Nothing is compared;
//! the resolver trusts that the build stages ran first.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Workspace;
use crate::error::{Error, IoContext, Result};

/// A logical output bound to its source path and its normalized name.
#[derive(Debug, Clone)]
pub struct ArtifactBinding {
    pub name: &'static str,
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// The two bindings the launcher depends on.
pub fn bindings(ws: &Workspace) -> [ArtifactBinding; 2] {
    [
        ArtifactBinding {
            name: "firmware",
            source: ws.firmware_source(),
            dest: ws.firmware(),
        },
        ArtifactBinding {
            name: "kernel",
            source: ws.kernel_source(),
            dest: ws.kernel(),
        },
    ]
}

/// Fail with `MissingArtifact` unless `path` is a non-empty file.
pub fn check(name: &str, path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        _ => Err(Error::MissingArtifact {
            name: name.to_string(),
            path: path.to_path_buf(),
        }),
    }
}

/// Copy `binding.source` to `binding.dest`, replacing whatever is there.
///
/// The copy keeps the source's permission bits and always carries the
/// executable bits. It is written to `<dest>.work` and renamed, so the
/// destination is either the old file or the complete new one.
pub fn place(binding: &ArtifactBinding) -> Result<u64> {
    let size = check(binding.name, &binding.source)?;

    let work = work_path(&binding.dest);
    let _ = fs::remove_file(&work);

    let result = copy_executable(&binding.source, &work);
    if let Err(e) = result {
        let _ = fs::remove_file(&work);
        return Err(e);
    }

    fs::rename(&work, &binding.dest)
        .with_io_context(|| format!("replacing {}", binding.dest.display()))?;

    info!(
        artifact = binding.name,
        dest = %binding.dest.display(),
        bytes = size,
        "placed artifact"
    );
    Ok(size)
}

/// Place firmware and kernel. Both sources are checked before either
/// destination is touched.
pub fn resolve_all(ws: &Workspace) -> Result<()> {
    let bindings = bindings(ws);
    for binding in &bindings {
        check(binding.name, &binding.source)?;
    }
    for binding in &bindings {
        place(binding)?;
    }
    Ok(())
}

fn copy_executable(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_io_context(|| format!("creating {}", parent.display()))?;
    }
    fs::copy(source, dest).with_io_context(|| {
        format!("copying {} to {}", source.display(), dest.display())
    })?;

    let mut perms = fs::metadata(dest)
        .with_io_context(|| format!("reading {}", dest.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(dest, perms)
        .with_io_context(|| format!("setting permissions on {}", dest.display()))
}

fn work_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".work");
    dest.with_file_name(name)
}
