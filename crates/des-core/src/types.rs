use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// PhaseStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotExecuted,
    InProgress,
    Executed,
    Skipped,
}

impl PhaseStatus {
    pub fn all() -> &'static [PhaseStatus] {
        &[
            PhaseStatus::NotExecuted,
            PhaseStatus::InProgress,
            PhaseStatus::Executed,
            PhaseStatus::Skipped,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::NotExecuted => "NOT_EXECUTED",
            PhaseStatus::InProgress => "IN_PROGRESS",
            PhaseStatus::Executed => "EXECUTED",
            PhaseStatus::Skipped => "SKIPPED",
        }
    }

    /// Executed or skipped: the phase is no longer pending.
    pub fn is_settled(self) -> bool {
        matches!(self, PhaseStatus::Executed | PhaseStatus::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = crate::error::DesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_EXECUTED" => Ok(PhaseStatus::NotExecuted),
            "IN_PROGRESS" => Ok(PhaseStatus::InProgress),
            "EXECUTED" => Ok(PhaseStatus::Executed),
            "SKIPPED" => Ok(PhaseStatus::Skipped),
            _ => Err(crate::error::DesError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

pub const OUTCOME_PASS: &str = "PASS";
pub const OUTCOME_FAIL: &str = "FAIL";
pub const OUTCOME_SKIP: &str = "SKIP";

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Step-level status in a step file's `state` block.
pub const STEP_IN_PROGRESS: &str = "IN_PROGRESS";
pub const STEP_COMPLETED: &str = "COMPLETED";
pub const STEP_NOT_STARTED: &str = "TODO";

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// Task categories that carry their own turn ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Quick,
    Background,
    Standard,
    Research,
    Complex,
}

impl TaskType {
    pub fn all() -> &'static [TaskType] {
        &[
            TaskType::Quick,
            TaskType::Background,
            TaskType::Standard,
            TaskType::Research,
            TaskType::Complex,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Quick => "quick",
            TaskType::Background => "background",
            TaskType::Standard => "standard",
            TaskType::Research => "research",
            TaskType::Complex => "complex",
        }
    }

    /// Lenient lookup: unknown names yield `None` so callers can fall back.
    pub fn parse(s: &str) -> Option<TaskType> {
        let wanted = s.trim().to_ascii_lowercase();
        TaskType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
