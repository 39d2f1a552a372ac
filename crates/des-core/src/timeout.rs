//! Phase timeout monitoring.
//!
//! The orchestrator polls the monitor at turn boundaries. Each warning
//! threshold fires at most once per phase execution; once the budget is
//! spent a single overrun warning follows. Warnings never stop execution,
//! they are text for the agent's next turn.

use crate::error::{DesError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PHASE_BUDGET_MINUTES: u32 = 30;
pub const DEFAULT_WARNING_THRESHOLDS: [u32; 3] = [15, 22, 27];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutWarning {
    pub phase: String,
    /// The threshold that fired; `None` for the overrun warning.
    pub threshold_minutes: Option<u32>,
    pub elapsed_minutes: i64,
    pub budget_minutes: u32,
    pub remaining_minutes: i64,
    pub percent_elapsed: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutMonitor {
    phase: String,
    started_at: DateTime<Utc>,
    thresholds: Vec<u32>,
    budget_minutes: u32,
    #[serde(default)]
    fired: Vec<u32>,
    #[serde(default)]
    overrun_warned: bool,
}

/// Thresholds must be positive and strictly ascending.
pub fn validate_thresholds(thresholds: &[u32], budget_minutes: u32) -> Result<()> {
    if budget_minutes == 0 {
        return Err(DesError::Config(
            "phase budget must be a positive number of minutes".into(),
        ));
    }
    if thresholds.contains(&0) {
        return Err(DesError::Config(
            "warning thresholds must be positive minutes".into(),
        ));
    }
    if thresholds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(DesError::Config(format!(
            "warning thresholds must be strictly ascending, got {thresholds:?}"
        )));
    }
    if let Some(last) = thresholds.last().filter(|t| **t > budget_minutes) {
        return Err(DesError::Config(format!(
            "warning threshold {last} exceeds the {budget_minutes} minute budget"
        )));
    }
    Ok(())
}

impl TimeoutMonitor {
    pub fn new(
        phase: impl Into<String>,
        started_at: DateTime<Utc>,
        thresholds: Vec<u32>,
        budget_minutes: u32,
    ) -> Result<Self> {
        validate_thresholds(&thresholds, budget_minutes)?;
        Ok(Self {
            phase: phase.into(),
            started_at,
            thresholds,
            budget_minutes,
            fired: Vec::new(),
            overrun_warned: false,
        })
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn budget_minutes(&self) -> u32 {
        self.budget_minutes
    }

    pub fn fired(&self) -> &[u32] {
        &self.fired
    }

    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_minutes().max(0)
    }

    /// Warnings for thresholds crossed since the last check.
    pub fn check(&mut self, now: DateTime<Utc>) -> Vec<TimeoutWarning> {
        let elapsed = self.elapsed_minutes(now);
        let mut warnings = Vec::new();

        let crossed: Vec<u32> = self
            .thresholds
            .iter()
            .copied()
            .filter(|t| i64::from(*t) <= elapsed && !self.fired.contains(t))
            .collect();
        for threshold in crossed {
            self.fired.push(threshold);
            warnings.push(self.warning(Some(threshold), elapsed));
        }

        if elapsed > i64::from(self.budget_minutes) && !self.overrun_warned {
            self.overrun_warned = true;
            warnings.push(self.warning(None, elapsed));
        }
        warnings
    }

    /// Grant more time. Percentages and the overrun check use the new
    /// budget; thresholds already fired stay fired.
    pub fn extend(&mut self, additional_minutes: u32) {
        self.budget_minutes = self.budget_minutes.saturating_add(additional_minutes);
        self.overrun_warned = false;
    }

    fn warning(&self, threshold: Option<u32>, elapsed: i64) -> TimeoutWarning {
        let budget = i64::from(self.budget_minutes);
        let remaining = (budget - elapsed).max(0);
        let percent = u32::try_from(elapsed * 100 / budget).unwrap_or(u32::MAX);
        let message = match threshold {
            Some(_) => format!(
                "TIMEOUT WARNING: {percent}% of the phase budget used \
                 ({elapsed}/{budget} min), {remaining} min remaining in {}",
                self.phase
            ),
            None => format!(
                "TIMEOUT EXCEEDED: {} has run {elapsed} min against a {budget} min budget \
                 ({percent}%), 0 min remaining; wrap up or request an extension",
                self.phase
            ),
        };
        TimeoutWarning {
            phase: self.phase.clone(),
            threshold_minutes: threshold,
            elapsed_minutes: elapsed,
            budget_minutes: self.budget_minutes,
            remaining_minutes: remaining,
            percent_elapsed: percent,
            message,
        }
    }
}
