//! Workspace input checks: the files the pipeline reads but never builds.

use std::fs;
use std::path::Path;

use super::CheckResult;
use crate::config::Workspace;

pub fn check_inputs(ws: &Workspace) -> Vec<CheckResult> {
    vec![
        check_makefile("kernel tree", &ws.kernel_dir()),
        check_makefile("user tree", &ws.user_dir()),
        check_firmware(&ws.firmware_source()),
        check_storage(&ws.image_archive(), &ws.image()),
    ]
}

fn check_makefile(name: &str, dir: &Path) -> CheckResult {
    if dir.join("Makefile").is_file() {
        CheckResult::pass(name, dir.display().to_string())
    } else {
        CheckResult::fail(
            name,
            format!("No Makefile in {}", dir.display()),
            "Run from the workspace root or pass --workspace",
        )
    }
}

fn check_firmware(path: &Path) -> CheckResult {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            CheckResult::pass("firmware", format!("{} ({} bytes)", path.display(), meta.len()))
        }
        Ok(_) => CheckResult::fail(
            "firmware",
            format!("{} is empty", path.display()),
            "Rebuild the SBI firmware",
        ),
        Err(_) => CheckResult::fail(
            "firmware",
            format!("{} not found", path.display()),
            "Build or fetch the SBI firmware into bootloader/",
        ),
    }
}

fn check_storage(archive: &Path, image: &Path) -> CheckResult {
    if image.is_file() {
        CheckResult::pass("storage image", format!("{} present", image.display()))
    } else if archive.is_file() {
        CheckResult::pass(
            "storage image",
            format!("{} will be decompressed", archive.display()),
        )
    } else {
        CheckResult::fail(
            "storage image",
            format!("Neither {} nor {} exists", image.display(), archive.display()),
            "Restore the checked-in archive",
        )
    }
}
