//! Per-feature execution log.
//!
//! Layout:
//!   docs/feature/<project>/execution-log.yaml
//!
//! ```yaml
//! schema_version: "3.0"
//! project_id: auth
//! events:
//!   - "01-01|PREPARE|EXECUTED|PASS|2026-02-09T09:00:00Z"
//!   - {sid: "01-01", p: GREEN, s: EXECUTED, d: PASS, t: "2026-02-09T09:40:00Z", tu: 9, tk: 31000}
//! ```
//!
//! The log is append-only. Readers classify each entry independently; the
//! declared schema version never changes how an entry is parsed.

use crate::error::{DesError, Result};
use crate::event::{self, PhaseEvent};
use crate::io;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Logs declaring this version were written with pipe strings only.
pub const LEGACY_STRING_SCHEMA_VERSION: &str = "2.0";
pub const STRUCTURED_SCHEMA_VERSION: &str = "3.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionLog {
    #[serde(default, deserialize_with = "version_string")]
    pub schema_version: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub events: Vec<Value>,
}

impl ExecutionLog {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            schema_version: STRUCTURED_SCHEMA_VERSION.to_string(),
            project_id: project_id.into(),
            events: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load a log. A missing file is an error distinct from an empty log.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DesError::ExecutionLogNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(path, data.as_bytes())
    }

    /// Write an empty log for `project_id` unless one already exists.
    pub fn create(path: &Path, project_id: &str) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let log = Self::new(project_id);
        log.save(path)?;
        Ok(log)
    }

    /// Append one event as a structured record, creating the log when absent.
    pub fn append(path: &Path, project_id: &str, event: &PhaseEvent) -> Result<()> {
        let mut log = if path.exists() {
            Self::load(path)?
        } else {
            Self::new(project_id)
        };
        if log.project_id.is_empty() {
            log.project_id = project_id.to_string();
        }
        log.events.push(event.to_record());
        log.save(path)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// True when the declared version promises pipe strings only. Advisory.
    pub fn declares_legacy_strings(&self) -> bool {
        self.schema_version == LEGACY_STRING_SCHEMA_VERSION
    }

    pub fn events(&self) -> Vec<PhaseEvent> {
        event::parse_all(&self.events)
    }

    pub fn step_events(&self, step_id: &str) -> Vec<PhaseEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.step_id == step_id)
            .collect()
    }

    /// Events grouped by step id; relative order within a step is kept.
    pub fn events_by_step(&self) -> BTreeMap<String, Vec<PhaseEvent>> {
        group_by_step(self.events())
    }
}

pub fn group_by_step(events: Vec<PhaseEvent>) -> BTreeMap<String, Vec<PhaseEvent>> {
    let mut grouped: BTreeMap<String, Vec<PhaseEvent>> = BTreeMap::new();
    for event in events {
        grouped.entry(event.step_id.clone()).or_default().push(event);
    }
    grouped
}

/// Every parseable event in the log, in file order.
pub fn read_all_events(log_path: &Path) -> Result<Vec<PhaseEvent>> {
    Ok(ExecutionLog::load(log_path)?.events())
}

/// Events for one step, in file order.
pub fn read_step_events(log_path: &Path, step_id: &str) -> Result<Vec<PhaseEvent>> {
    Ok(ExecutionLog::load(log_path)?.step_events(step_id))
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

fn version_string<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::String(s) => s,
        Value::Number(n) => {
            // An unquoted `2.0` arrives as a float; keep one decimal place.
            match n.as_f64() {
                Some(f) if n.is_f64() && f.fract() == 0.0 => format!("{f:.1}"),
                _ => n.to_string(),
            }
        }
        _ => String::new(),
    })
}

fn null_as_empty<'de, D>(d: D) -> std::result::Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(d)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
