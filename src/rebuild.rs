//! Rebuild detection for pipeline stages.
//!
//! A stage with declared inputs and outputs is skipped when every output
//! exists, the digest of its inputs matches the stamp written after its
//! last successful run, and the outputs still hash to what that run
//! produced. Stamps live under `<state_dir>/stamps/`: `<stage>.hash` for
//! inputs, `<stage>.out.hash` for outputs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cache;
use crate::error::{IoContext, Result};

#[derive(Debug, Clone)]
pub struct StampStore {
    dir: PathBuf,
}

impl StampStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("stamps"),
        }
    }

    pub fn stamp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.hash", key))
    }

    pub fn output_stamp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.out.hash", key))
    }

    /// Digest of `inputs` under `root`, taken before the stage runs.
    pub fn digest(&self, root: &Path, inputs: &[PathBuf]) -> Option<String> {
        cache::hash_inputs(root, inputs)
    }

    /// Whether the stage's outputs are current for `digest`.
    ///
    /// A missing digest (unreadable or absent inputs) is never fresh, and
    /// neither is an output rewritten since the stage last ran.
    pub fn is_fresh(
        &self,
        key: &str,
        digest: Option<&str>,
        root: &Path,
        outputs: &[PathBuf],
    ) -> bool {
        let Some(digest) = digest else {
            return false;
        };
        let absolute: Vec<PathBuf> = outputs.iter().map(|o| root.join(o)).collect();
        let fresh = !cache::needs_rebuild(digest, &self.stamp_path(key), &absolute)
            && self.outputs_unchanged(key, root, outputs);
        debug!(stage = key, digest, fresh, "freshness");
        fresh
    }

    fn outputs_unchanged(&self, key: &str, root: &Path, outputs: &[PathBuf]) -> bool {
        let Some(recorded) = cache::read_cached_hash(&self.output_stamp_path(key)) else {
            return false;
        };
        cache::hash_inputs(root, outputs).as_deref() == Some(recorded.as_str())
    }

    pub fn recorded(&self, key: &str) -> Option<String> {
        cache::read_cached_hash(&self.stamp_path(key))
    }

    /// Record a digest after a successful run.
    pub fn record(&self, key: &str, digest: &str) -> Result<()> {
        let path = self.stamp_path(key);
        cache::write_cached_hash(&path, digest)
            .with_io_context(|| format!("writing stamp {}", path.display()))
    }

    /// Record what a successful run produced. Outputs that cannot be hashed
    /// leave no output stamp, so the stage stays stale.
    pub fn record_outputs(&self, key: &str, root: &Path, outputs: &[PathBuf]) -> Result<()> {
        let path = self.output_stamp_path(key);
        match cache::hash_inputs(root, outputs) {
            Some(digest) => cache::write_cached_hash(&path, &digest)
                .with_io_context(|| format!("writing stamp {}", path.display())),
            None => {
                let _ = fs::remove_file(&path);
                Ok(())
            }
        }
    }
}
