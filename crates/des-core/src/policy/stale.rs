//! Abandoned phase detection.
//!
//! A phase left IN_PROGRESS with a `started_at` older than the threshold and
//! no `ended_at` is treated as abandoned: the agent that started it is gone
//! and the step cannot be trusted until someone resolves it.

use crate::error::Result;
use crate::event::parse_timestamp;
use crate::paths;
use crate::step_file::StepFile;
use crate::types::PhaseStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STALE_THRESHOLD_MINUTES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaleExecution {
    pub step_file: PathBuf,
    pub step_id: String,
    pub phase_name: String,
    pub started_at: String,
    pub age_minutes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaleCheckResult {
    pub is_blocked: bool,
    pub stale_executions: Vec<StaleExecution>,
    /// Step files or timestamps that could not be read.
    pub warnings: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct StaleExecutionDetector {
    threshold_minutes: u32,
}

impl Default for StaleExecutionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_THRESHOLD_MINUTES)
    }
}

impl StaleExecutionDetector {
    pub fn new(threshold_minutes: u32) -> Self {
        Self { threshold_minutes }
    }

    pub fn threshold_minutes(&self) -> u32 {
        self.threshold_minutes
    }

    /// Check already-loaded step files against `now`.
    pub fn check(&self, steps: &[(PathBuf, StepFile)], now: DateTime<Utc>) -> StaleCheckResult {
        let mut result = StaleCheckResult::default();
        for (path, step) in steps {
            for phase in step.phases() {
                if phase.status != PhaseStatus::InProgress || phase.ended_at.is_some() {
                    continue;
                }
                let Some(raw) = phase.started_at.as_deref() else {
                    result.warnings.push(format!(
                        "{}: phase {} is IN_PROGRESS without started_at",
                        path.display(),
                        phase.phase_name
                    ));
                    continue;
                };
                let Some(started) = parse_timestamp(raw) else {
                    result.warnings.push(format!(
                        "{}: phase {} has unparseable started_at '{}'",
                        path.display(),
                        phase.phase_name,
                        raw
                    ));
                    continue;
                };
                let age_minutes = (now - started).num_minutes();
                if age_minutes > i64::from(self.threshold_minutes) {
                    result.stale_executions.push(StaleExecution {
                        step_file: path.clone(),
                        step_id: step.step_id().to_string(),
                        phase_name: phase.phase_name.clone(),
                        started_at: raw.to_string(),
                        age_minutes,
                    });
                }
            }
        }
        result.is_blocked = !result.stale_executions.is_empty();
        result.reason = self.reason(&result.stale_executions);
        result
    }

    /// Scan `docs/feature/*/steps/` under `root`. Unreadable step files are
    /// reported as warnings, not errors.
    pub fn scan(&self, root: &Path, now: DateTime<Utc>) -> Result<StaleCheckResult> {
        let mut steps = Vec::new();
        let mut warnings = Vec::new();
        for project in paths::list_feature_ids(root)? {
            let scan = StepFile::scan_dir(&paths::steps_dir(root, &project))?;
            steps.extend(scan.steps);
            warnings.extend(
                scan.unreadable
                    .into_iter()
                    .map(|(path, err)| format!("{}: {}", path.display(), err)),
            );
        }
        let mut result = self.check(&steps, now);
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        Ok(result)
    }

    fn reason(&self, stale: &[StaleExecution]) -> String {
        if stale.is_empty() {
            return "no stale executions".to_string();
        }
        let listed: Vec<String> = stale
            .iter()
            .map(|s| format!("{} {} ({} min)", s.step_id, s.phase_name, s.age_minutes))
            .collect();
        format!(
            "{} phase(s) IN_PROGRESS for more than {} minutes: {}",
            stale.len(),
            self.threshold_minutes,
            listed.join(", ")
        )
    }
}
