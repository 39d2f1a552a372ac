use super::build_globset;
use crate::error::Result;
use crate::paths;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub fn default_source_patterns() -> Vec<String> {
    ["src/**", "tests/**", "lib/**"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn default_artifact_patterns() -> Vec<String> {
    ["docs/feature/**", ".nwave/**", "**/.develop-progress.json"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub path: String,
    pub blocked: bool,
    pub reason: String,
}

/// During a deliver session, source edits must come from a DES-monitored
/// task. Orchestration artifacts are always writable.
#[derive(Debug, Clone)]
pub struct SessionGuardPolicy {
    source: GlobSet,
    artifacts: GlobSet,
}

impl SessionGuardPolicy {
    pub fn new<S: AsRef<str>>(source_patterns: &[S], artifact_patterns: &[S]) -> Result<Self> {
        Ok(Self {
            source: build_globset(source_patterns)?,
            artifacts: build_globset(artifact_patterns)?,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(&default_source_patterns(), &default_artifact_patterns())
    }

    pub fn check(&self, path: &str, session_active: bool, des_task_active: bool) -> GuardDecision {
        let path = paths::normalize_repo_path(Path::new(""), path);
        let allow = |reason: &str| GuardDecision {
            path: path.clone(),
            blocked: false,
            reason: reason.to_string(),
        };

        if self.artifacts.is_match(&path) {
            return allow("orchestration artifact, always writable");
        }
        if !self.source.is_match(&path) {
            return allow("not a guarded source path");
        }
        if !session_active {
            return allow("no deliver session active");
        }
        if des_task_active {
            return allow("write made by a DES-monitored task");
        }
        GuardDecision {
            reason: format!(
                "{path} is source code and a deliver session is active; \
                 source changes during deliver must go through a DES-monitored task"
            ),
            path,
            blocked: true,
        }
    }
}
