//! Runs a resolved target.
//!
//! Stages execute strictly one at a time. The first failure stops the run;
//! nothing later in the order starts.

use tracing::{info, warn};

use crate::error::Result;
use crate::timing::Timer;

use super::context::StageContext;
use super::executor::execute;
use super::{Freshness, Stage, StageGraph};

/// What a finished run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}

/// One row of `plan` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStage {
    pub name: String,
    pub description: String,
    /// Would be skipped as up to date.
    pub fresh: bool,
}

pub struct Runner<'a> {
    ctx: StageContext<'a>,
    force: bool,
}

impl<'a> Runner<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx, force: false }
    }

    /// Ignore recorded digests and run every stage.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn context(&self) -> &StageContext<'a> {
        &self.ctx
    }

    pub fn run(&self, graph: &StageGraph, target: &str) -> Result<RunReport> {
        let order = graph.resolve(target)?;
        let mut report = RunReport::default();

        for stage in order {
            let digest = match self.check(stage) {
                Check::Fresh => {
                    info!("[SKIP] {} (inputs unchanged)", stage.name);
                    report.skipped.push(stage.name.clone());
                    continue;
                }
                Check::Stale(digest) => digest,
            };

            info!("==> {}", stage.name);
            let timer = Timer::start(stage.name.as_str());
            execute(&self.ctx, stage)?;
            timer.finish();

            if let Some(digest) = digest {
                self.stamp(stage, &digest);
            }
            report.executed.push(stage.name.clone());
        }

        Ok(report)
    }

    /// Resolve `target` and report freshness without running anything.
    pub fn plan(&self, graph: &StageGraph, target: &str) -> Result<Vec<PlannedStage>> {
        Ok(graph
            .resolve(target)?
            .into_iter()
            .map(|stage| PlannedStage {
                name: stage.name.clone(),
                description: stage.description.clone(),
                fresh: matches!(self.check(stage), Check::Fresh),
            })
            .collect())
    }

    /// A lost stamp only costs a rebuild next time.
    fn stamp(&self, stage: &Stage, digest: &str) {
        let Freshness::ContentHash { outputs, .. } = &stage.freshness else {
            return;
        };
        let root = self.ctx.workspace.root();
        let recorded = self
            .ctx
            .stamps
            .record_outputs(&stage.name, root, outputs)
            .and_then(|()| self.ctx.stamps.record(&stage.name, digest));
        if let Err(e) = recorded {
            warn!("{}", e);
        }
    }

    fn check(&self, stage: &Stage) -> Check {
        let Freshness::ContentHash { inputs, outputs } = &stage.freshness else {
            return Check::Stale(None);
        };
        let root = self.ctx.workspace.root();
        let digest = self.ctx.stamps.digest(root, inputs);
        if !self.force
            && self
                .ctx
                .stamps
                .is_fresh(&stage.name, digest.as_deref(), root, outputs)
        {
            return Check::Fresh;
        }
        Check::Stale(digest)
    }
}

enum Check {
    Fresh,
    /// Run it; record this digest afterwards if there is one.
    Stale(Option<String>),
}
