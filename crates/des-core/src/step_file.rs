use crate::error::{DesError, Result};
use crate::event::PhaseEvent;
use crate::schema::TddSchema;
use crate::types::{PhaseStatus, OUTCOME_SKIP, STEP_NOT_STARTED};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Extension
// ---------------------------------------------------------------------------

/// Extra turns and minutes granted to a phase that ran over budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extension {
    pub timestamp: String,
    pub reason: String,
    #[serde(default)]
    pub additional_turns: u32,
    #[serde(default)]
    pub additional_minutes: u32,
    pub approved_by: String,
}

// ---------------------------------------------------------------------------
// PhaseExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub phase_name: String,
    pub phase_index: usize,
    pub status: PhaseStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub turn_count: u32,
    #[serde(default)]
    pub extensions_granted: Vec<Extension>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub blocked_by: Option<String>,
}

impl PhaseExecution {
    pub fn not_executed(phase_name: impl Into<String>, phase_index: usize) -> Self {
        Self {
            phase_name: phase_name.into(),
            phase_index,
            status: PhaseStatus::NotExecuted,
            started_at: None,
            ended_at: None,
            outcome: None,
            turn_count: 0,
            extensions_granted: Vec::new(),
            duration_seconds: None,
            duration_minutes: None,
            notes: None,
            blocked_by: None,
        }
    }

    pub fn extension_turns(&self) -> u32 {
        self.extensions_granted.iter().map(|e| e.additional_turns).sum()
    }

    pub fn extension_minutes(&self) -> u32 {
        self.extensions_granted
            .iter()
            .map(|e| e.additional_minutes)
            .sum()
    }

    /// The outcome a validator should see. For skipped phases the skip
    /// reason lives in `blocked_by` when set.
    pub fn effective_outcome(&self) -> String {
        if self.status == PhaseStatus::Skipped {
            if let Some(reason) = self.blocked_by.as_deref().filter(|r| !r.is_empty()) {
                return reason.to_string();
            }
            return self
                .outcome
                .clone()
                .unwrap_or_else(|| OUTCOME_SKIP.to_string());
        }
        self.outcome.clone().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// StepFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpecification {
    pub task_id: String,
    pub project_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TddCycle {
    #[serde(default)]
    pub phase_execution_log: Vec<PhaseExecution>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One unit of tracked work. Unknown keys survive a load/save round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFile {
    pub task_specification: TaskSpecification,
    pub state: StepState,
    pub tdd_cycle: TddCycle,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepFile {
    /// A fresh step with one NOT_EXECUTED entry per schema phase.
    pub fn new(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        schema: &TddSchema,
    ) -> Self {
        let log = schema
            .phases()
            .iter()
            .enumerate()
            .map(|(i, name)| PhaseExecution::not_executed(name.clone(), i))
            .collect();
        Self {
            task_specification: TaskSpecification {
                task_id: task_id.into(),
                project_id: project_id.into(),
                extra: Map::new(),
            },
            state: StepState {
                status: STEP_NOT_STARTED.to_string(),
                started_at: None,
                ended_at: None,
                extra: Map::new(),
            },
            tdd_cycle: TddCycle {
                phase_execution_log: log,
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DesError::StepFileNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_string_pretty(self)?;
        data.push('\n');
        crate::io::atomic_write(path, data.as_bytes())
    }

    /// Load every `*.json` in a directory, sorted by file name. Files that
    /// fail to parse are returned separately instead of aborting the scan.
    pub fn scan_dir(dir: &Path) -> Result<StepScan> {
        let mut scan = StepScan::default();
        if !dir.is_dir() {
            return Ok(scan);
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        for path in paths {
            match Self::load(&path) {
                Ok(step) => scan.steps.push((path, step)),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable step file"
                    );
                    scan.unreadable.push((path, e.to_string()));
                }
            }
        }
        Ok(scan)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn step_id(&self) -> &str {
        &self.task_specification.task_id
    }

    pub fn project_id(&self) -> &str {
        &self.task_specification.project_id
    }

    pub fn phases(&self) -> &[PhaseExecution] {
        &self.tdd_cycle.phase_execution_log
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseExecution> {
        self.tdd_cycle
            .phase_execution_log
            .iter()
            .find(|p| p.phase_name == name)
    }

    pub fn phase_mut(&mut self, name: &str) -> Result<&mut PhaseExecution> {
        self.tdd_cycle
            .phase_execution_log
            .iter_mut()
            .find(|p| p.phase_name == name)
            .ok_or_else(|| DesError::UnknownPhase(name.to_string()))
    }

    /// The bundled schema matching this file's phase layout, for files
    /// written before the current schema.
    pub fn matching_schema(&self) -> Option<TddSchema> {
        TddSchema::for_phase_count(self.phases().len())
    }

    /// Phase log as events, one per entry that has left NOT_EXECUTED.
    pub fn to_events(&self) -> Vec<PhaseEvent> {
        self.phases()
            .iter()
            .filter(|p| p.status != PhaseStatus::NotExecuted)
            .map(|p| PhaseEvent {
                step_id: self.step_id().to_string(),
                phase_name: p.phase_name.clone(),
                status: p.status,
                outcome: p.effective_outcome(),
                timestamp: p
                    .ended_at
                    .clone()
                    .or_else(|| p.started_at.clone())
                    .unwrap_or_default(),
                turns_used: Some(p.turn_count),
                tokens_used: None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct StepScan {
    pub steps: Vec<(PathBuf, StepFile)>,
    pub unreadable: Vec<(PathBuf, String)>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn schema() -> TddSchema {
        TddSchema::current().unwrap()
    }

    #[test]
    fn new_step_is_seeded_per_phase() {
        let step = StepFile::new("01-01", "auth", &schema());
        assert_eq!(step.phases().len(), 5);
        for (i, p) in step.phases().iter().enumerate() {
            assert_eq!(p.phase_index, i);
            assert_eq!(p.status, PhaseStatus::NotExecuted);
            assert!(p.extensions_granted.is_empty());
            assert_eq!(p.turn_count, 0);
            assert!(p.duration_seconds.is_none());
        }
        assert!(step.to_events().is_empty());
    }

    #[test]
    fn json_wire_shape() {
        let step = StepFile::new("01-01", "auth", &schema());
        let json: Value = serde_json::to_value(&step).unwrap();
        let entry = &json["tdd_cycle"]["phase_execution_log"][0];
        assert_eq!(entry["phase_name"], "PREPARE");
        assert_eq!(entry["status"], "NOT_EXECUTED");
        assert_eq!(entry["extensions_granted"], serde_json::json!([]));
        assert!(entry["duration_minutes"].is_null());
        assert_eq!(json["task_specification"]["task_id"], "01-01");
    }

    #[test]
    fn roundtrip_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("01-01.json");
        let raw = serde_json::json!({
            "task_specification": {"task_id": "01-01", "project_id": "auth", "name": "Login form"},
            "state": {"status": "IN_PROGRESS", "started_at": "2026-02-09T09:00:00Z", "ended_at": null},
            "tdd_cycle": {"phase_execution_log": [], "acceptance_test": {"scenario": "login"}},
            "quality_gates": {"coverage": 0.9}
        });
        std::fs::write(&path, raw.to_string()).unwrap();

        let step = StepFile::load(&path).unwrap();
        step.save(&path).unwrap();
        let reread: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread["task_specification"]["name"], "Login form");
        assert_eq!(reread["tdd_cycle"]["acceptance_test"]["scenario"], "login");
        assert_eq!(reread["quality_gates"]["coverage"], 0.9);
    }

    #[test]
    fn missing_file_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            StepFile::load(&dir.path().join("x.json")),
            Err(DesError::StepFileNotFound(_))
        ));
    }

    #[test]
    fn skipped_entry_uses_blocked_by_reason() {
        let mut step = StepFile::new("01-01", "auth", &schema());
        let entry = step.phase_mut("RED_ACCEPTANCE").unwrap();
        entry.status = PhaseStatus::Skipped;
        entry.outcome = Some("SKIP".to_string());
        entry.blocked_by = Some("NOT_APPLICABLE: internal refactor".to_string());
        let events = step.to_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, "NOT_APPLICABLE: internal refactor");
    }

    #[test]
    fn scan_dir_separates_unreadable_files() {
        let dir = TempDir::new().unwrap();
        StepFile::new("01-01", "auth", &schema())
            .save(&dir.path().join("01-01.json"))
            .unwrap();
        std::fs::write(dir.path().join("01-02.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let scan = StepFile::scan_dir(dir.path()).unwrap();
        assert_eq!(scan.steps.len(), 1);
        assert_eq!(scan.unreadable.len(), 1);
        assert!(scan.unreadable[0].0.ends_with("01-02.json"));
    }

    #[test]
    fn extension_totals() {
        let mut entry = PhaseExecution::not_executed("GREEN", 3);
        for (turns, minutes) in [(5, 10), (3, 0)] {
            entry.extensions_granted.push(Extension {
                timestamp: "2026-02-09T10:00:00Z".to_string(),
                reason: "complex refactor".to_string(),
                additional_turns: turns,
                additional_minutes: minutes,
                approved_by: "lead".to_string(),
            });
        }
        assert_eq!(entry.extension_turns(), 8);
        assert_eq!(entry.extension_minutes(), 10);
    }
}
