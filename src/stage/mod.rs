//! Stage graph for the ChaOS build pipeline.
//!
//! A [`Stage`] names its prerequisites, the [`Op`] it performs and how its
//! freshness is judged. [`StageGraph::resolve`] turns a target name into
//! the ordered list of stages to run: prerequisites first, in declared
//! order, each stage once.
//!
//! ```text
//! run ──┬─ build-all ── place-artifacts ── build-kernel ──┬─ format
//!       │                                                 └─ build-user ── format
//!       └─ provision-image
//! ```

pub mod context;
pub mod definitions;
pub mod executor;
pub mod runner;

pub use context::StageContext;
pub use definitions::{pipeline, targets};
pub use runner::{PlannedStage, RunReport, Runner};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::process::Cmd;

/// What a stage does once its prerequisites have completed.
#[derive(Debug, Clone)]
pub enum Op {
    /// Run commands in order; each carries its own working directory.
    Commands(Vec<Cmd>),
    /// Copy firmware and kernel to their normalized names.
    PlaceArtifacts,
    /// Decompress the storage image if absent.
    ProvisionImage,
    /// Boot the VM in the foreground.
    Launch,
    /// Headless boot with console checks.
    SmokeTest,
    /// Remove generated artifacts, then run the delegated cleanup commands.
    Clean(Vec<Cmd>),
    BuildSandbox,
    EnterSandbox,
    /// Nothing beyond the prerequisites.
    Group,
}

/// When a stage may be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Run on every invocation.
    Always,
    /// Skip when all outputs exist and the inputs hash to the recorded
    /// digest. Paths are workspace-relative.
    ContentHash {
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub description: String,
    pub prerequisites: Vec<String>,
    pub op: Op,
    pub freshness: Freshness,
}

impl Stage {
    pub fn new(name: impl Into<String>, description: impl Into<String>, op: Op) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prerequisites: Vec::new(),
            op,
            freshness: Freshness::Always,
        }
    }

    pub fn after(mut self, prerequisites: &[&str]) -> Self {
        self.prerequisites
            .extend(prerequisites.iter().map(|p| p.to_string()));
        self
    }

    pub fn fresh_when(mut self, inputs: Vec<PathBuf>, outputs: Vec<PathBuf>) -> Self {
        self.freshness = Freshness::ContentHash { inputs, outputs };
        self
    }
}

/// Named stages in declaration order.
#[derive(Debug, Default)]
pub struct StageGraph {
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stage: Stage) -> Result<()> {
        if self.index.contains_key(&stage.name) {
            return Err(Error::DuplicateStage(stage.name));
        }
        self.index.insert(stage.name.clone(), self.stages.len());
        self.stages.push(stage);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stages to execute for `target`, prerequisites first.
    ///
    /// Fails on unknown names and on cycles before anything runs.
    pub fn resolve(&self, target: &str) -> Result<Vec<&Stage>> {
        let mut order = Vec::new();
        let mut done = HashSet::new();
        let mut path = Vec::new();
        self.visit(target, &mut done, &mut path, &mut order)?;
        Ok(order)
    }

    /// Check every stage resolves.
    pub fn validate(&self) -> Result<()> {
        for stage in &self.stages {
            self.resolve(&stage.name)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<&'a Stage>,
    ) -> Result<()> {
        let stage = self
            .get(name)
            .ok_or_else(|| Error::UnknownTarget(name.to_string()))?;

        if done.contains(stage.name.as_str()) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|n| *n == stage.name) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(stage.name.clone());
            return Err(Error::DependencyCycle(cycle));
        }

        path.push(&stage.name);
        for prerequisite in &stage.prerequisites {
            self.visit(prerequisite, done, path, order)?;
        }
        path.pop();

        done.insert(&stage.name);
        order.push(stage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> StageGraph {
        let mut g = StageGraph::new();
        for (name, prereqs) in edges {
            g.add(Stage::new(*name, "", Op::Group).after(prereqs)).unwrap();
        }
        g
    }

    fn names(stages: Vec<&Stage>) -> Vec<&str> {
        stages.into_iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_prerequisites_first_in_declared_order() {
        let g = graph(&[
            ("format", &[]),
            ("user", &["format"]),
            ("kernel", &["format", "user"]),
            ("all", &["kernel"]),
        ]);
        assert_eq!(
            names(g.resolve("all").unwrap()),
            vec!["format", "user", "kernel", "all"]
        );
    }

    #[test]
    fn test_shared_prerequisite_runs_once() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("top", &["b", "c", "a"])]);
        assert_eq!(names(g.resolve("top").unwrap()), vec!["a", "b", "c", "top"]);
    }

    #[test]
    fn test_unknown_target() {
        let g = graph(&[("a", &[])]);
        assert!(matches!(g.resolve("nope"), Err(Error::UnknownTarget(ref n)) if n == "nope"));
    }

    #[test]
    fn test_unknown_prerequisite() {
        let g = graph(&[("a", &["missing"])]);
        assert!(matches!(g.resolve("a"), Err(Error::UnknownTarget(ref n)) if n == "missing"));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_cycle_detected() {
        let g = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        match g.resolve("a") {
            Err(Error::DependencyCycle(cycle)) => assert_eq!(cycle, vec!["a", "c", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other.map(names)),
        }
    }

    #[test]
    fn test_self_cycle() {
        let g = graph(&[("a", &["a"])]);
        assert!(matches!(g.resolve("a"), Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn test_duplicate_stage() {
        let mut g = StageGraph::new();
        g.add(Stage::new("a", "", Op::Group)).unwrap();
        assert!(matches!(
            g.add(Stage::new("a", "", Op::Group)),
            Err(Error::DuplicateStage(_))
        ));
    }
}
