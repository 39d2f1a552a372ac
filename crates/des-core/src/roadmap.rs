use crate::error::{DesError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Roadmap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapStep {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Paths or glob patterns the step is allowed to touch.
    #[serde(default)]
    pub files_to_modify: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapPhase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<RoadmapStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadmapScope {
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roadmap {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub phases: Vec<RoadmapPhase>,
    #[serde(default)]
    pub scope: RoadmapScope,
}

impl Roadmap {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DesError::RoadmapNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn steps(&self) -> impl Iterator<Item = &RoadmapStep> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    /// Declared step ids in declaration order.
    pub fn step_ids(&self) -> Vec<String> {
        self.steps().map(|s| s.id.clone()).collect()
    }

    pub fn step(&self, step_id: &str) -> Option<&RoadmapStep> {
        self.steps().find(|s| s.id == step_id)
    }

    /// Patterns that make up the declared scope: the roadmap-wide allowed
    /// patterns plus the files of one step, or of every step when `step_id`
    /// is `None`.
    pub fn scope_patterns(&self, step_id: Option<&str>) -> Vec<String> {
        let mut patterns = self.scope.allowed_patterns.clone();
        match step_id {
            Some(id) => {
                if let Some(step) = self.step(id) {
                    patterns.extend(step.files_to_modify.iter().cloned());
                }
            }
            None => patterns.extend(self.steps().flat_map(|s| s.files_to_modify.iter().cloned())),
        }
        patterns
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
