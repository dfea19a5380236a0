//! What a running stage can reach.

use std::time::Duration;

use crate::config::Workspace;
use crate::process::Executor;
use crate::rebuild::StampStore;

/// Default limit for the headless boot check.
pub const DEFAULT_SMOKE_TIMEOUT: Duration = Duration::from_secs(120);

pub struct StageContext<'a> {
    pub workspace: &'a Workspace,
    pub executor: &'a dyn Executor,
    /// Container image tag for the sandbox stages.
    pub image_tag: String,
    pub smoke_timeout: Duration,
    pub stamps: StampStore,
}

impl<'a> StageContext<'a> {
    pub fn new(
        workspace: &'a Workspace,
        executor: &'a dyn Executor,
        image_tag: impl Into<String>,
    ) -> Self {
        Self {
            workspace,
            executor,
            image_tag: image_tag.into(),
            smoke_timeout: DEFAULT_SMOKE_TIMEOUT,
            stamps: StampStore::new(&workspace.state_dir()),
        }
    }

    pub fn with_smoke_timeout(mut self, timeout: Duration) -> Self {
        self.smoke_timeout = timeout;
        self
    }
}
