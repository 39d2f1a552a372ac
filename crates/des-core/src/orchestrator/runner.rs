use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::completion::{CompletionResult, StepCompletionValidator};
use crate::config::{DesConfig, TimeoutConfig};
use crate::error::{DesError, Result};
use crate::event::{parse_timestamp, PhaseEvent};
use crate::execution_log::{self, ExecutionLog};
use crate::paths;
use crate::policy::turn_limit::{TurnCheck, TurnPolicy};
use crate::schema::TddSchema;
use crate::step_file::{Extension, StepFile};
use crate::timeout::{TimeoutMonitor, TimeoutWarning};
use crate::types::{
    PhaseStatus, OUTCOME_FAIL, OUTCOME_SKIP, STEP_COMPLETED, STEP_IN_PROGRESS, STEP_NOT_STARTED,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key under `tdd_cycle` holding the running phase's monitor.
const MONITOR_KEY: &str = "timeout_monitor";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// The phase currently running, if any.
    pub phase: Option<String>,
    pub warnings: Vec<TimeoutWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_check: Option<TurnCheck>,
}

pub struct PhaseOrchestrator {
    project_id: String,
    step_path: PathBuf,
    log_path: PathBuf,
    step: StepFile,
    schema: Arc<TddSchema>,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
    timeout: TimeoutConfig,
    turns: TurnPolicy,
    task_type: Option<String>,
}

impl PhaseOrchestrator {
    /// Open a step of `project_id` under `root`. A step without a file
    /// starts from a fresh one seeded from the schema; nothing is written
    /// until the first transition.
    pub fn open(
        root: &Path,
        project_id: &str,
        step_id: &str,
        schema: Arc<TddSchema>,
        timeout: TimeoutConfig,
    ) -> Result<Self> {
        let step_path = paths::step_file_path(root, project_id, step_id);
        let step = if step_path.exists() {
            StepFile::load(&step_path)?
        } else {
            StepFile::new(step_id, project_id, &schema)
        };
        Ok(Self {
            project_id: project_id.to_string(),
            step_path,
            log_path: paths::execution_log_path(root, project_id),
            step,
            schema,
            clock: Arc::new(SystemClock),
            audit: AuditLogger::null(),
            timeout,
            turns: TurnPolicy::default(),
            task_type: None,
        })
    }

    /// Open with everything taken from the project configuration.
    pub fn from_config(
        root: &Path,
        config: &DesConfig,
        project_id: &str,
        step_id: &str,
    ) -> Result<Self> {
        let schema = config.load_schema(root)?;
        Ok(Self::open(root, project_id, step_id, schema, config.timeout.clone())?
            .with_audit(AuditLogger::from_config(root, &config.audit))
            .with_turn_policy(TurnPolicy::new(config.turn_limits.clone())))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_turn_policy(mut self, turns: TurnPolicy) -> Self {
        self.turns = turns;
        self
    }

    /// Check turn counts against this task type's ceiling on every poll.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn step(&self) -> &StepFile {
        &self.step
    }

    pub fn step_path(&self) -> &Path {
        &self.step_path
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub fn start_phase(&mut self, phase: &str) -> Result<()> {
        let index = self
            .schema
            .phase_index(phase)
            .ok_or_else(|| DesError::UnknownPhase(phase.to_string()))?;
        for earlier in &self.schema.phases()[..index] {
            let Some(entry) = self.step.phase(earlier).filter(|p| p.status.is_settled()) else {
                return Err(DesError::PhaseOutOfOrder {
                    phase: phase.to_string(),
                    pending: earlier.clone(),
                });
            };
            // A deferred skip or a failed run stops progression until retried.
            let outcome = entry.effective_outcome();
            let outcome = outcome.trim();
            if outcome == OUTCOME_FAIL || self.schema.is_blocking_skip(outcome) {
                return Err(DesError::PhaseBlocked {
                    phase: phase.to_string(),
                    blocker: earlier.clone(),
                    outcome: outcome.to_string(),
                });
            }
        }

        let now = self.clock.now();
        let now_iso = format_timestamp(now);
        let entry = self.step.phase_mut(phase)?;
        entry.status = PhaseStatus::InProgress;
        entry.started_at = Some(now_iso.clone());
        entry.ended_at = None;
        entry.outcome = None;
        entry.blocked_by = None;
        entry.turn_count = 0;
        entry.duration_seconds = None;
        entry.duration_minutes = None;
        let extension_minutes = entry.extension_minutes();

        if self.step.state.status == STEP_NOT_STARTED {
            self.step.state.status = STEP_IN_PROGRESS.to_string();
        }
        if self.step.state.started_at.is_none() {
            self.step.state.started_at = Some(now_iso);
        }

        let mut monitor = TimeoutMonitor::new(
            phase,
            now,
            self.timeout.warning_thresholds_minutes.clone(),
            self.timeout.phase_budget_minutes,
        )?;
        monitor.extend(extension_minutes);
        self.store_monitor(Some(&monitor))?;
        self.step.save(&self.step_path)?;

        tracing::info!(step = self.step.step_id(), phase, "phase started");
        self.audit(AuditEventType::PhaseStarted, json!({ "phase": phase }));
        Ok(())
    }

    /// Record the running phase's turn count and collect newly fired
    /// timeout warnings. Polling with nothing running reports nothing.
    pub fn poll(&mut self, turn_count: u32) -> Result<PollReport> {
        let Some(mut monitor) = self.load_monitor()? else {
            return Ok(PollReport {
                phase: None,
                warnings: Vec::new(),
                turn_check: None,
            });
        };
        let phase = monitor.phase().to_string();
        let entry = self.step.phase_mut(&phase)?;
        entry.turn_count = turn_count;
        let extension_turns = entry.extension_turns();

        let warnings = monitor.check(self.clock.now());
        self.store_monitor(Some(&monitor))?;
        self.step.save(&self.step_path)?;

        for warning in &warnings {
            tracing::warn!(step = self.step.step_id(), phase = %phase, "{}", warning.message);
            self.audit(
                AuditEventType::TimeoutWarning,
                json!({
                    "phase": phase,
                    "elapsed_minutes": warning.elapsed_minutes,
                    "budget_minutes": warning.budget_minutes,
                    "threshold_minutes": warning.threshold_minutes,
                }),
            );
        }

        let turn_check = self
            .task_type
            .as_deref()
            .map(|t| self.turns.check(t, turn_count, extension_turns));
        if let Some(check) = turn_check.as_ref().filter(|c| c.exceeded) {
            tracing::warn!(step = self.step.step_id(), phase = %phase, "{}", check.reason);
        }

        Ok(PollReport {
            phase: Some(phase),
            warnings,
            turn_check,
        })
    }

    pub fn complete_phase(
        &mut self,
        phase: &str,
        outcome: &str,
        turns: Option<u32>,
        tokens: Option<u64>,
    ) -> Result<PhaseEvent> {
        let now = self.clock.now();
        let now_iso = format_timestamp(now);
        let outcome = outcome.trim().to_string();

        let entry = self.step.phase_mut(phase)?;
        if entry.status != PhaseStatus::InProgress {
            return Err(DesError::PhaseNotStarted {
                phase: phase.to_string(),
            });
        }
        if let Some(turns) = turns {
            entry.turn_count = turns;
        }
        let started = entry.started_at.as_deref().and_then(parse_timestamp);
        entry.status = PhaseStatus::Executed;
        entry.outcome = Some(outcome.clone());
        entry.ended_at = Some(now_iso.clone());
        set_durations(entry, started, now);
        let turn_count = entry.turn_count;

        self.clear_monitor_for(phase)?;

        let mut event = PhaseEvent::new(
            self.step.step_id(),
            phase,
            PhaseStatus::Executed,
            outcome.clone(),
            now_iso,
        );
        event.turns_used = Some(turn_count);
        event.tokens_used = tokens;
        ExecutionLog::append(&self.log_path, &self.project_id, &event)?;
        self.step.save(&self.step_path)?;

        tracing::info!(step = self.step.step_id(), phase, outcome = %outcome, "phase completed");
        self.audit(
            AuditEventType::PhaseCompleted,
            json!({ "phase": phase, "outcome": outcome, "turns": turn_count, "tokens": tokens }),
        );
        Ok(event)
    }

    /// Skip a phase. The reason must start with a recognized skip prefix and
    /// the terminal phase can never be skipped.
    pub fn skip_phase(&mut self, phase: &str, reason: &str) -> Result<PhaseEvent> {
        let reason = reason.trim().to_string();
        if !self.schema.contains_phase(phase) {
            return Err(DesError::UnknownPhase(phase.to_string()));
        }
        if self.schema.is_terminal(phase) {
            return Err(DesError::InvalidSkipReason {
                phase: phase.to_string(),
                reason: format!("'{reason}': the terminal phase cannot be skipped"),
            });
        }
        if !self.schema.is_valid_skip(&reason) && !self.schema.is_blocking_skip(&reason) {
            let mut prefixes = self.schema.valid_skip_prefixes().to_vec();
            prefixes.extend(self.schema.blocking_skip_prefixes().iter().cloned());
            return Err(DesError::InvalidSkipReason {
                phase: phase.to_string(),
                reason: format!("'{reason}' must start with one of {}", prefixes.join(" ")),
            });
        }

        let now_iso = self.clock.now_iso();
        let entry = self.step.phase_mut(phase)?;
        entry.status = PhaseStatus::Skipped;
        entry.outcome = Some(OUTCOME_SKIP.to_string());
        entry.blocked_by = Some(reason.clone());
        entry.ended_at = Some(now_iso.clone());
        self.clear_monitor_for(phase)?;

        let event = PhaseEvent::new(
            self.step.step_id(),
            phase,
            PhaseStatus::Skipped,
            reason.clone(),
            now_iso,
        );
        ExecutionLog::append(&self.log_path, &self.project_id, &event)?;
        self.step.save(&self.step_path)?;

        tracing::info!(step = self.step.step_id(), phase, reason = %reason, "phase skipped");
        self.audit(
            AuditEventType::PhaseSkipped,
            json!({ "phase": phase, "reason": reason }),
        );
        Ok(event)
    }

    /// Grant extra turns and minutes to a phase. A running monitor for the
    /// phase gets the extra minutes immediately.
    pub fn grant_extension(&mut self, phase: &str, extension: Extension) -> Result<()> {
        let entry = self.step.phase_mut(phase)?;
        entry.extensions_granted.push(extension.clone());

        if let Some(mut monitor) = self.load_monitor()? {
            if monitor.phase() == phase {
                monitor.extend(extension.additional_minutes);
                self.store_monitor(Some(&monitor))?;
            }
        }
        self.step.save(&self.step_path)?;

        tracing::info!(
            step = self.step.step_id(),
            phase,
            turns = extension.additional_turns,
            minutes = extension.additional_minutes,
            "extension granted"
        );
        self.audit(
            AuditEventType::ExtensionGranted,
            json!({
                "phase": phase,
                "reason": extension.reason,
                "additional_turns": extension.additional_turns,
                "additional_minutes": extension.additional_minutes,
                "approved_by": extension.approved_by,
            }),
        );
        Ok(())
    }

    /// Validate the step's logged events and mark it COMPLETED when they
    /// prove every phase.
    pub fn finalize(&mut self) -> Result<CompletionResult> {
        let events = execution_log::read_step_events(&self.log_path, self.step.step_id())?;
        let result =
            StepCompletionValidator::new(&self.schema).validate(self.step.step_id(), &events);
        if result.is_complete {
            self.step.state.status = STEP_COMPLETED.to_string();
            self.step.state.ended_at = Some(self.clock.now_iso());
            self.step.save(&self.step_path)?;
        }

        tracing::info!(step = self.step.step_id(), status = %result.status, "step finalized");
        self.audit(
            AuditEventType::StepFinalized,
            json!({
                "status": result.status,
                "missing_phases": result.missing_phases,
                "reason": result.reason,
            }),
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn audit(&self, event: AuditEventType, details: serde_json::Value) {
        self.audit.log(
            AuditEvent::new(event, self.clock.now())
                .project(self.project_id.clone())
                .step(self.step.step_id())
                .details(details),
        );
    }

    fn load_monitor(&self) -> Result<Option<TimeoutMonitor>> {
        match self.step.tdd_cycle.extra.get(MONITOR_KEY) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    fn store_monitor(&mut self, monitor: Option<&TimeoutMonitor>) -> Result<()> {
        match monitor {
            Some(m) => {
                self.step
                    .tdd_cycle
                    .extra
                    .insert(MONITOR_KEY.to_string(), serde_json::to_value(m)?);
            }
            None => {
                self.step.tdd_cycle.extra.remove(MONITOR_KEY);
            }
        }
        Ok(())
    }

    fn clear_monitor_for(&mut self, phase: &str) -> Result<()> {
        if self.load_monitor()?.is_some_and(|m| m.phase() == phase) {
            self.store_monitor(None)?;
        }
        Ok(())
    }
}

fn set_durations(
    entry: &mut crate::step_file::PhaseExecution,
    started: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) {
    if let Some(started) = started {
        let seconds = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
        entry.duration_seconds = Some(seconds);
        entry.duration_minutes = Some((seconds / 60.0 * 100.0).round() / 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{read_events, JsonlAuditWriter};
    use crate::clock::FixedClock;
    use crate::completion::CompletionStatus;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        clock: Arc<FixedClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                clock: Arc::new(FixedClock::new(
                    Utc.with_ymd_and_hms(2026, 2, 9, 10, 0, 0).unwrap(),
                )),
            }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn audit_dir(&self) -> PathBuf {
            self.root().join("audit")
        }

        fn open(&self) -> PhaseOrchestrator {
            PhaseOrchestrator::open(
                self.root(),
                "auth",
                "01-01",
                Arc::new(TddSchema::current().unwrap()),
                TimeoutConfig::default(),
            )
            .unwrap()
            .with_clock(self.clock.clone())
            .with_audit(AuditLogger::jsonl(self.audit_dir()))
        }
    }

    fn run_phase(orch: &mut PhaseOrchestrator, clock: &FixedClock, phase: &str) {
        orch.start_phase(phase).unwrap();
        clock.advance_minutes(5);
        orch.complete_phase(phase, "PASS", Some(3), Some(1200)).unwrap();
    }

    #[test]
    fn full_cycle_finalizes_complete() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        for phase in ["PREPARE", "RED_ACCEPTANCE", "RED_UNIT", "GREEN", "COMMIT"] {
            run_phase(&mut orch, &fx.clock, phase);
        }
        let result = orch.finalize().unwrap();
        assert_eq!(result.status, CompletionStatus::Complete);

        let saved = StepFile::load(&paths::step_file_path(fx.root(), "auth", "01-01")).unwrap();
        assert_eq!(saved.state.status, STEP_COMPLETED);
        let green = saved.phase("GREEN").unwrap();
        assert_eq!(green.duration_seconds, Some(300.0));
        assert_eq!(green.duration_minutes, Some(5.0));
        assert_eq!(green.turn_count, 3);

        let log_path = paths::execution_log_path(fx.root(), "auth");
        let events = execution_log::read_step_events(&log_path, "01-01").unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].tokens_used, Some(1200));
    }

    #[test]
    fn phases_must_run_in_order() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        let err = orch.start_phase("GREEN").unwrap_err();
        assert!(matches!(
            err,
            DesError::PhaseOutOfOrder { ref pending, .. } if pending == "PREPARE"
        ));
    }

    #[test]
    fn deferred_skip_blocks_later_phases() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        run_phase(&mut orch, &fx.clock, "PREPARE");
        orch.skip_phase("RED_ACCEPTANCE", "DEFERRED: later").unwrap();

        let err = orch.start_phase("RED_UNIT").unwrap_err();
        assert!(matches!(
            err,
            DesError::PhaseBlocked { ref blocker, ref outcome, .. }
                if blocker == "RED_ACCEPTANCE" && outcome == "DEFERRED: later"
        ));
        assert_eq!(orch.step().phase("RED_UNIT").unwrap().status, PhaseStatus::NotExecuted);
    }

    #[test]
    fn failed_phase_blocks_until_retried() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        for phase in ["PREPARE", "RED_ACCEPTANCE", "RED_UNIT"] {
            run_phase(&mut orch, &fx.clock, phase);
        }
        orch.start_phase("GREEN").unwrap();
        orch.complete_phase("GREEN", "FAIL", None, None).unwrap();

        let err = orch.start_phase("COMMIT").unwrap_err();
        assert!(matches!(err, DesError::PhaseBlocked { ref blocker, .. } if blocker == "GREEN"));

        run_phase(&mut orch, &fx.clock, "GREEN");
        orch.start_phase("COMMIT").unwrap();
    }

    #[test]
    fn unknown_phase_rejected() {
        let fx = Fixture::new();
        assert!(matches!(fx.open().start_phase("DEPLOY"), Err(DesError::UnknownPhase(_))));
    }

    #[test]
    fn complete_requires_running_phase() {
        let fx = Fixture::new();
        let err = fx.open().complete_phase("PREPARE", "PASS", None, None).unwrap_err();
        assert!(matches!(err, DesError::PhaseNotStarted { .. }));
    }

    #[test]
    fn skip_needs_prefix_and_never_terminal() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        assert!(matches!(
            orch.skip_phase("RED_ACCEPTANCE", "no time"),
            Err(DesError::InvalidSkipReason { .. })
        ));
        assert!(matches!(
            orch.skip_phase("COMMIT", "NOT_APPLICABLE: nothing to commit"),
            Err(DesError::InvalidSkipReason { .. })
        ));
        let event = orch
            .skip_phase("RED_ACCEPTANCE", "NOT_APPLICABLE: internal refactor")
            .unwrap();
        assert_eq!(event.status, PhaseStatus::Skipped);
        let entry = orch.step().phase("RED_ACCEPTANCE").unwrap();
        assert_eq!(entry.blocked_by.as_deref(), Some("NOT_APPLICABLE: internal refactor"));
    }

    #[test]
    fn poll_fires_each_threshold_once() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        orch.start_phase("PREPARE").unwrap();
        fx.clock.advance_minutes(16);
        let report = orch.poll(4).unwrap();
        assert_eq!(report.phase.as_deref(), Some("PREPARE"));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].message.contains("PREPARE"));

        // A fresh process sees the same monitor state.
        let mut reopened = fx.open();
        assert!(reopened.poll(5).unwrap().warnings.is_empty());
        assert_eq!(reopened.step().phase("PREPARE").unwrap().turn_count, 5);
    }

    #[test]
    fn poll_without_running_phase_is_quiet() {
        let fx = Fixture::new();
        let report = fx.open().poll(1).unwrap();
        assert!(report.phase.is_none());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn extension_raises_turns_and_budget() {
        let fx = Fixture::new();
        let mut orch = fx.open().with_task_type("quick");
        orch.start_phase("PREPARE").unwrap();
        orch.grant_extension(
            "PREPARE",
            Extension {
                timestamp: fx.clock.now_iso(),
                reason: "large fixture setup".into(),
                additional_turns: 10,
                additional_minutes: 30,
                approved_by: "lead".into(),
            },
        )
        .unwrap();
        fx.clock.advance_minutes(35);
        let report = orch.poll(25).unwrap();
        let check = report.turn_check.unwrap();
        assert_eq!(check.limit, 30);
        assert!(!check.exceeded);
        assert!(report.warnings.iter().all(|w| w.threshold_minutes.is_some()));
    }

    #[test]
    fn finalize_incomplete_leaves_status() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        run_phase(&mut orch, &fx.clock, "PREPARE");
        let result = orch.finalize().unwrap();
        assert_eq!(result.status, CompletionStatus::Incomplete);
        assert!(result.missing_phases.contains(&"COMMIT".to_string()));
        assert_eq!(orch.step().state.status, STEP_IN_PROGRESS);
    }

    #[test]
    fn transitions_are_audited() {
        let fx = Fixture::new();
        let mut orch = fx.open();
        run_phase(&mut orch, &fx.clock, "PREPARE");
        let file = JsonlAuditWriter::new(fx.audit_dir()).file_for(fx.clock.now());
        let kinds: Vec<AuditEventType> =
            read_events(&file).unwrap().into_iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![AuditEventType::PhaseStarted, AuditEventType::PhaseCompleted]);
    }
}
