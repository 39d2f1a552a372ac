//! Cross-check of a roadmap against its execution log.
//!
//! Every declared step must show up in the log with every schema phase
//! either executed or skipped. Logged steps the roadmap does not declare are
//! ignored.

use crate::event::PhaseEvent;
use crate::schema::TddSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub step_id: String,
    pub has_execution_log: bool,
    /// Distinct schema phases the log covers for this step.
    pub phase_count: usize,
    pub missing_phases: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverIntegrityResult {
    pub is_valid: bool,
    pub steps_verified: usize,
    pub violations: Vec<IntegrityViolation>,
    pub reason: String,
}

pub struct DeliverIntegrityVerifier<'a> {
    schema: &'a TddSchema,
}

impl<'a> DeliverIntegrityVerifier<'a> {
    pub fn new(schema: &'a TddSchema) -> Self {
        Self { schema }
    }

    pub fn verify(
        &self,
        step_ids: &[String],
        events_by_step: &BTreeMap<String, Vec<PhaseEvent>>,
    ) -> DeliverIntegrityResult {
        let mut violations = Vec::new();

        for step_id in step_ids {
            let Some(events) = events_by_step.get(step_id).filter(|e| !e.is_empty()) else {
                violations.push(IntegrityViolation {
                    step_id: step_id.clone(),
                    has_execution_log: false,
                    phase_count: 0,
                    missing_phases: self.schema.phases().to_vec(),
                    reason: format!(
                        "step {step_id} has no execution log entries: \
                         implemented without DES monitoring"
                    ),
                });
                continue;
            };

            let covered: HashSet<&str> = events
                .iter()
                .filter(|e| e.status.is_settled())
                .map(|e| e.phase_name.as_str())
                .collect();
            let missing_phases: Vec<String> = self
                .schema
                .phases()
                .iter()
                .filter(|p| !covered.contains(p.as_str()))
                .cloned()
                .collect();
            if missing_phases.is_empty() {
                continue;
            }
            let phase_count = self.schema.phases().len() - missing_phases.len();
            violations.push(IntegrityViolation {
                reason: format!(
                    "step {step_id} is missing phases: {}",
                    missing_phases.join(", ")
                ),
                step_id: step_id.clone(),
                has_execution_log: true,
                phase_count,
                missing_phases,
            });
        }

        let reason = if violations.is_empty() {
            format!("all {} roadmap step(s) fully logged", step_ids.len())
        } else {
            let ids: Vec<&str> = violations.iter().map(|v| v.step_id.as_str()).collect();
            format!(
                "{} of {} roadmap step(s) failed integrity: {}",
                violations.len(),
                step_ids.len(),
                ids.join(", ")
            )
        };

        DeliverIntegrityResult {
            is_valid: violations.is_empty(),
            steps_verified: step_ids.len(),
            violations,
            reason,
        }
    }
}
