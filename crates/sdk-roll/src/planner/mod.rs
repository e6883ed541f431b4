use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::executor::CommandSpec;
use crate::stamp::StampGuard;

pub type StageId = String;

/// One step of the roll pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    pub id: StageId,
    pub label: String,
    /// Default working directory for commands that do not set their own.
    pub working_dir: Option<PathBuf>,
    /// Launch every command at once and join them; otherwise run in order.
    pub concurrent: bool,
    pub commands: Vec<CommandSpec>,
    pub stamp: Option<StampGuard>,
}

impl Stage {
    pub fn new(id: impl Into<String>, label: impl Into<String>, commands: Vec<CommandSpec>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            working_dir: None,
            concurrent: false,
            commands,
            stamp: None,
        }
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stamped(mut self, guard: StampGuard) -> Self {
        self.stamp = Some(guard);
        self
    }
}

/// Stages in declaration order; ids are unique.
#[derive(Debug, Default, Clone)]
pub struct Plan {
    stages: Vec<Stage>,
    ids: BTreeSet<StageId>,
}

impl Plan {
    pub fn add(&mut self, stage: Stage) -> Result<()> {
        if stage.id.trim().is_empty() {
            return Err(Error::msg("stage id must not be empty"));
        }
        if !self.ids.insert(stage.id.clone()) {
            return Err(Error::msg(format!("duplicate stage id '{}'", stage.id)));
        }
        self.stages.push(stage);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Human-readable listing used by `roll plan`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            let mut flags = Vec::new();
            if stage.concurrent {
                flags.push("concurrent");
            }
            if stage.stamp.is_some() {
                flags.push("stamped");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            out.push_str(&format!("{}. {} ({}){}\n", i + 1, stage.id, stage.label, flags));
            for cmd in &stage.commands {
                let cwd = cmd
                    .cwd
                    .as_ref()
                    .or(stage.working_dir.as_ref())
                    .map(|p| format!("  (in {})", p.display()))
                    .unwrap_or_default();
                out.push_str(&format!("   $ {}{}\n", cmd.display(), cwd));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str) -> Stage {
        Stage::new(id, id.to_uppercase(), vec![CommandSpec::new(["true"])])
    }

    #[test]
    fn keeps_declaration_order_and_rejects_duplicates() {
        let mut plan = Plan::default();
        plan.add(stage("sync")).expect("sync");
        plan.add(stage("build")).expect("build");
        plan.add(stage("test")).expect("test");
        assert_eq!(plan.ids(), vec!["sync", "build", "test"]);

        let err = plan.add(stage("build")).unwrap_err().to_string();
        assert!(err.contains("duplicate stage id 'build'"), "unexpected: {err}");
        assert_eq!(plan.len(), 3);
        assert!(plan.add(stage(" ")).is_err());
    }

    #[test]
    fn describe_lists_commands_with_working_dirs() {
        let mut plan = Plan::default();
        plan.add(
            Stage::new(
                "gn",
                "Generate build files",
                vec![
                    CommandSpec::new(["flutter/tools/gn", "--runtime-mode=debug"]),
                    CommandSpec::new(["flutter/tools/gn", "--runtime-mode=release"]).cwd("/other"),
                ],
            )
            .concurrent(true)
            .working_dir("/engine/src"),
        )
        .expect("add");

        let text = plan.describe();
        assert!(text.starts_with("1. gn (Generate build files) [concurrent]\n"), "{text}");
        assert!(text.contains("$ flutter/tools/gn --runtime-mode=debug  (in /engine/src)"), "{text}");
        assert!(text.contains("--runtime-mode=release  (in /other)"), "{text}");
    }
}
