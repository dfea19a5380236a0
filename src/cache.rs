//! Content hashing for rebuild detection.
//!
//! Digests are BLAKE3 over file contents, never timestamps.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into when hashing a tree.
pub const EXCLUDED_DIRS: &[&str] = &["target", ".git"];

/// Hex BLAKE3 digest of a single file.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// Digest over a set of files and directory trees under `root`.
///
/// Each file contributes its root-relative path, its length and its
/// contents, in sorted walk order. Returns `None` if any input is missing
/// or unreadable, or if a symlink loop is found.
pub fn hash_inputs(root: &Path, inputs: &[PathBuf]) -> Option<String> {
    let mut hasher = blake3::Hasher::new();

    for input in inputs {
        let full = root.join(input);
        if !full.exists() {
            return None;
        }
        for file in collect_files(&full)? {
            let rel = file.strip_prefix(root).unwrap_or(&file);
            hasher.update(rel.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            let len = fs::metadata(&file).ok()?.len();
            hasher.update(&len.to_le_bytes());
            let mut f = File::open(&file).ok()?;
            io::copy(&mut f, &mut hasher).ok()?;
        }
    }

    Some(hasher.finalize().to_hex().to_string())
}

fn collect_files(path: &Path) -> Option<Vec<PathBuf>> {
    if path.is_file() {
        return Some(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    // Symlinked sources are hashed by their target's content.
    let walker = WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_excluded(e));
    for entry in walker {
        let entry = entry.ok()?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Some(files)
}

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

pub fn read_cached_hash(hash_file: &Path) -> Option<String> {
    fs::read_to_string(hash_file)
        .ok()
        .map(|s| s.trim().to_string())
}

pub fn write_cached_hash(hash_file: &Path, hash: &str) -> io::Result<()> {
    if let Some(parent) = hash_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(hash_file, hash)
}

/// An artifact needs rebuilding if any output is missing or the stored
/// digest differs from `current_hash`.
pub fn needs_rebuild(current_hash: &str, hash_file: &Path, outputs: &[PathBuf]) -> bool {
    if outputs.iter().any(|o| !o.exists()) {
        return true;
    }
    read_cached_hash(hash_file).as_deref() != Some(current_hash)
}
