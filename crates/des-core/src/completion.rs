//! Step completion: has a step actually been through every phase?
//!
//! Per phase, only the latest event in log order counts. Timestamps are
//! never consulted, so a retry logged with the same timestamp as the failure
//! it corrects still supersedes it.

use crate::event::PhaseEvent;
use crate::schema::TddSchema;
use crate::step_file::StepFile;
use crate::types::{PhaseStatus, OUTCOME_FAIL, OUTCOME_PASS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// CompletionStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Complete,
    Incomplete,
    Blocked,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompletionStatus::Complete => "COMPLETE",
            CompletionStatus::Incomplete => "INCOMPLETE",
            CompletionStatus::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// CompletionResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPhase {
    pub phase: String,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub step_id: String,
    pub status: CompletionStatus,
    pub is_complete: bool,
    /// Phases with no qualifying event yet, in schema order.
    pub missing_phases: Vec<String>,
    /// Phases whose latest event forbids progression, in schema order.
    pub blocking_phases: Vec<BlockedPhase>,
    /// Phase names seen in events that the schema does not define.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unrecognized_phases: Vec<String>,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

enum PhaseVerdict {
    Satisfied,
    Missing,
    Blocked(String),
}

pub struct StepCompletionValidator<'a> {
    schema: &'a TddSchema,
}

impl<'a> StepCompletionValidator<'a> {
    pub fn new(schema: &'a TddSchema) -> Self {
        Self { schema }
    }

    /// Validate the events recorded for one step. Events for other steps are
    /// ignored when `step_id` is non-empty.
    pub fn validate(&self, step_id: &str, events: &[PhaseEvent]) -> CompletionResult {
        let mut latest: HashMap<&str, &PhaseEvent> = HashMap::new();
        let mut unrecognized: Vec<String> = Vec::new();
        for event in events {
            if !step_id.is_empty() && event.step_id != step_id {
                continue;
            }
            if !self.schema.contains_phase(&event.phase_name) {
                if !unrecognized.contains(&event.phase_name) {
                    unrecognized.push(event.phase_name.clone());
                }
                continue;
            }
            // Later entries overwrite earlier ones: log order is authoritative.
            latest.insert(event.phase_name.as_str(), event);
        }

        let mut missing_phases = Vec::new();
        let mut blocking_phases = Vec::new();
        for phase in self.schema.phases() {
            match self.verdict(phase, latest.get(phase.as_str()).copied()) {
                PhaseVerdict::Satisfied => {}
                PhaseVerdict::Missing => missing_phases.push(phase.clone()),
                PhaseVerdict::Blocked(outcome) => blocking_phases.push(BlockedPhase {
                    phase: phase.clone(),
                    outcome,
                }),
            }
        }

        let status = if !blocking_phases.is_empty() {
            CompletionStatus::Blocked
        } else if !missing_phases.is_empty() {
            CompletionStatus::Incomplete
        } else {
            CompletionStatus::Complete
        };
        let reason = self.reason(step_id, status, &missing_phases, &blocking_phases);

        CompletionResult {
            step_id: step_id.to_string(),
            status,
            is_complete: status == CompletionStatus::Complete,
            missing_phases,
            blocking_phases,
            unrecognized_phases: unrecognized,
            reason,
        }
    }

    /// Validate a step file's own phase log.
    pub fn validate_step_file(&self, step: &StepFile) -> CompletionResult {
        self.validate(step.step_id(), &step.to_events())
    }

    fn verdict(&self, phase: &str, event: Option<&PhaseEvent>) -> PhaseVerdict {
        let Some(event) = event else {
            return PhaseVerdict::Missing;
        };
        let outcome = event.outcome.trim();
        if self.schema.is_blocking_skip(outcome) {
            return PhaseVerdict::Blocked(outcome.to_string());
        }
        if outcome == OUTCOME_FAIL {
            return PhaseVerdict::Blocked(outcome.to_string());
        }
        match event.status {
            PhaseStatus::Executed if outcome == OUTCOME_PASS => PhaseVerdict::Satisfied,
            // The terminal phase only counts once it has passed.
            PhaseStatus::Skipped
                if !self.schema.is_terminal(phase) && self.schema.is_valid_skip(outcome) =>
            {
                PhaseVerdict::Satisfied
            }
            _ => PhaseVerdict::Missing,
        }
    }

    fn reason(
        &self,
        step_id: &str,
        status: CompletionStatus,
        missing: &[String],
        blocking: &[BlockedPhase],
    ) -> String {
        match status {
            CompletionStatus::Complete => format!(
                "step {step_id}: all {} phases complete",
                self.schema.phases().len()
            ),
            CompletionStatus::Incomplete => {
                format!("step {step_id}: missing phases: {}", missing.join(", "))
            }
            CompletionStatus::Blocked => {
                let details: Vec<String> = blocking
                    .iter()
                    .map(|b| format!("{} ({})", b.phase, b.outcome))
                    .collect();
                let mut reason = format!("step {step_id}: blocked phases: {}", details.join(", "));
                if !missing.is_empty() {
                    reason.push_str(&format!("; missing phases: {}", missing.join(", ")));
                }
                reason
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2026-02-09T10:00:00Z";

    fn schema() -> TddSchema {
        TddSchema::current().unwrap()
    }

    fn passed(phase: &str) -> PhaseEvent {
        PhaseEvent::new("01-01", phase, PhaseStatus::Executed, "PASS", TS)
    }

    fn all_passed(schema: &TddSchema) -> Vec<PhaseEvent> {
        schema.phases().iter().map(|p| passed(p)).collect()
    }

    #[test]
    fn all_phases_passed_is_complete() {
        let schema = schema();
        let result = StepCompletionValidator::new(&schema).validate("01-01", &all_passed(&schema));
        assert_eq!(result.status, CompletionStatus::Complete);
        assert!(result.is_complete);
        assert!(result.missing_phases.is_empty());
    }

    #[test]
    fn missing_commit_is_incomplete_and_named() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events.pop();
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(result.status, CompletionStatus::Incomplete);
        assert_eq!(result.missing_phases, vec!["COMMIT"]);
        assert!(result.reason.contains("COMMIT"));
    }

    #[test]
    fn commit_cannot_be_skipped() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events.pop();
        events.push(PhaseEvent::new(
            "01-01",
            "COMMIT",
            PhaseStatus::Skipped,
            "APPROVED_SKIP: nothing to commit",
            TS,
        ));
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(result.status, CompletionStatus::Incomplete);
        assert_eq!(result.missing_phases, vec!["COMMIT"]);
    }

    #[test]
    fn valid_skip_counts_for_non_terminal_phase() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events[1] = PhaseEvent::new(
            "01-01",
            "RED_ACCEPTANCE",
            PhaseStatus::Skipped,
            "NOT_APPLICABLE: pure refactor",
            TS,
        );
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert!(result.is_complete, "{}", result.reason);
    }

    #[test]
    fn deferred_skip_blocks() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events[2] =
            PhaseEvent::new("01-01", "RED_UNIT", PhaseStatus::Skipped, "DEFERRED: later", TS);
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(result.status, CompletionStatus::Blocked);
        assert_eq!(result.blocking_phases[0].phase, "RED_UNIT");
        assert!(result.reason.contains("DEFERRED"));
    }

    #[test]
    fn unprefixed_skip_is_not_accepted() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events[1] = PhaseEvent::new("01-01", "RED_ACCEPTANCE", PhaseStatus::Skipped, "SKIP", TS);
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(result.missing_phases, vec!["RED_ACCEPTANCE"]);
    }

    #[test]
    fn failure_without_retry_blocks() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events.push(PhaseEvent::new("01-01", "GREEN", PhaseStatus::Executed, "FAIL", TS));
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(result.status, CompletionStatus::Blocked);
        assert_eq!(result.blocking_phases[0].phase, "GREEN");
    }

    #[test]
    fn later_pass_supersedes_failure() {
        let schema = schema();
        let mut events = vec![PhaseEvent::new("01-01", "GREEN", PhaseStatus::Executed, "FAIL", TS)];
        events.extend(all_passed(&schema));
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert!(result.is_complete);
    }

    #[test]
    fn identical_timestamps_resolve_by_log_order() {
        let schema = schema();
        let mut events = all_passed(&schema);
        // Same timestamp as the PASS already logged for GREEN, but later in the log.
        events.push(PhaseEvent::new("01-01", "GREEN", PhaseStatus::Executed, "FAIL", TS));
        let blocked = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(blocked.status, CompletionStatus::Blocked);

        events.push(passed("GREEN"));
        let recovered = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert!(recovered.is_complete);
    }

    #[test]
    fn in_progress_phase_is_missing() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events.push(PhaseEvent::new("01-01", "COMMIT", PhaseStatus::InProgress, "", TS));
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(result.status, CompletionStatus::Incomplete);
    }

    #[test]
    fn other_steps_and_unknown_phases_ignored() {
        let schema = schema();
        let mut events = all_passed(&schema);
        events.push(PhaseEvent::new("01-02", "GREEN", PhaseStatus::Executed, "FAIL", TS));
        events.push(PhaseEvent::new("01-01", "REFACTOR_L4", PhaseStatus::Executed, "PASS", TS));
        let result = StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert!(result.is_complete);
        assert_eq!(result.unrecognized_phases, vec!["REFACTOR_L4"]);
    }

    #[test]
    fn validation_does_not_mutate_input() {
        let schema = schema();
        let events = all_passed(&schema);
        let before = events.clone();
        StepCompletionValidator::new(&schema).validate("01-01", &events);
        assert_eq!(events, before);
    }

    #[test]
    fn step_file_all_executed_is_complete() {
        let schema = schema();
        let mut step = StepFile::new("01-01", "auth", &schema);
        for entry in step.tdd_cycle.phase_execution_log.iter_mut() {
            entry.status = PhaseStatus::Executed;
            entry.outcome = Some("PASS".to_string());
            entry.ended_at = Some(TS.to_string());
        }
        let result = StepCompletionValidator::new(&schema).validate_step_file(&step);
        assert!(result.is_complete);
    }

    #[test]
    fn fresh_step_file_lists_every_phase_missing() {
        let schema = schema();
        let step = StepFile::new("01-01", "auth", &schema);
        let result = StepCompletionValidator::new(&schema).validate_step_file(&step);
        assert_eq!(result.missing_phases.len(), 5);
    }
}
