//! Append-only audit trail of enforcement decisions.
//!
//! Layout:
//!   .nwave/des/audit/audit-YYYY-MM-DD.log  : one JSON object per line
//!
//! Writing is best-effort: a failed write is logged and dropped, never
//! returned to the operation being audited.

use crate::error::Result;
use crate::io;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

// ---------------------------------------------------------------------------
// AuditEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    PhaseStarted,
    PhaseCompleted,
    PhaseSkipped,
    ExtensionGranted,
    TimeoutWarning,
    StepFinalized,
    HookBlocked,
    HookPassed,
    ScopeViolation,
    StaleExecution,
    SessionGuardBlocked,
    DeliverIntegrityFailed,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEvent {
    pub fn new(event: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            event,
            project_id: None,
            step_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

pub trait AuditWriter: Send + Sync {
    fn log_event(&self, event: &AuditEvent) -> Result<()>;
}

/// Discards everything. Used when auditing is disabled and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditWriter;

impl AuditWriter for NullAuditWriter {
    fn log_event(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }
}

/// Daily-rotated JSON-lines files under one directory.
#[derive(Debug, Clone)]
pub struct JsonlAuditWriter {
    dir: PathBuf,
}

impl JsonlAuditWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_for(&self, ts: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("audit-{}.log", ts.format("%Y-%m-%d")))
    }
}

impl AuditWriter for JsonlAuditWriter {
    fn log_event(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        io::append_text(&self.file_for(event.timestamp), &line)
    }
}

/// Read back every record in an audit file. Lines that do not parse are
/// skipped.
pub fn read_events(path: &Path) -> Result<Vec<AuditEvent>> {
    let data = std::fs::read_to_string(path)?;
    Ok(data
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

// ---------------------------------------------------------------------------
// AuditLogger
// ---------------------------------------------------------------------------

/// Front door for audit writes. Swallows writer failures.
#[derive(Clone)]
pub struct AuditLogger {
    writer: Arc<dyn AuditWriter>,
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::null()
    }
}

impl AuditLogger {
    pub fn new(writer: Arc<dyn AuditWriter>) -> Self {
        Self { writer }
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullAuditWriter))
    }

    pub fn jsonl(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonlAuditWriter::new(dir)))
    }

    /// Pick the writer from configuration: disabled ⇒ null, otherwise JSONL
    /// under `root/dir`.
    pub fn from_config(root: &Path, config: &crate::config::AuditConfig) -> Self {
        if config.enabled {
            Self::jsonl(root.join(&config.dir))
        } else {
            Self::null()
        }
    }

    pub fn log(&self, event: AuditEvent) {
        if let Err(e) = self.writer.log_event(&event) {
            tracing::warn!(event = %event.event, error = %e, "audit write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Process-wide logger
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<RwLock<AuditLogger>> = OnceLock::new();

fn global_slot() -> &'static RwLock<AuditLogger> {
    GLOBAL.get_or_init(|| RwLock::new(AuditLogger::null()))
}

/// Replace the process-wide logger. Until called, audit writes go nowhere.
pub fn install(logger: AuditLogger) {
    *global_slot().write().unwrap_or_else(|e| e.into_inner()) = logger;
}

pub fn global() -> AuditLogger {
    global_slot()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DesError;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 9, 10, 0, 0).unwrap()
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<AuditEvent>>);

    impl AuditWriter for Recording {
        fn log_event(&self, event: &AuditEvent) -> Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    impl AuditWriter for Failing {
        fn log_event(&self, _event: &AuditEvent) -> Result<()> {
            Err(DesError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[test]
    fn jsonl_writer_appends_daily_file() {
        let dir = TempDir::new().unwrap();
        let logger = AuditLogger::jsonl(dir.path());
        logger.log(AuditEvent::new(AuditEventType::HookBlocked, ts()).step("01-01"));
        logger.log(
            AuditEvent::new(AuditEventType::HookPassed, ts())
                .project("auth")
                .details(serde_json::json!({"hook": "pre-commit"})),
        );

        let path = dir.path().join("audit-2026-02-09.log");
        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, AuditEventType::HookBlocked);
        assert_eq!(events[1].details["hook"], "pre-commit");
    }

    #[test]
    fn wire_names_are_screaming_snake() {
        let event = AuditEvent::new(AuditEventType::SessionGuardBlocked, ts());
        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"SESSION_GUARD_BLOCKED\""));
        assert_eq!(AuditEventType::TimeoutWarning.to_string(), "TIMEOUT_WARNING");
    }

    #[test]
    fn writer_failure_is_swallowed() {
        let logger = AuditLogger::new(Arc::new(Failing));
        logger.log(AuditEvent::new(AuditEventType::PhaseStarted, ts()));
    }

    #[test]
    fn null_logger_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = crate::config::AuditConfig {
            enabled: false,
            dir: PathBuf::from("audit"),
        };
        AuditLogger::from_config(dir.path(), &config)
            .log(AuditEvent::new(AuditEventType::PhaseStarted, ts()));
        assert!(!dir.path().join("audit").exists());
    }

    #[test]
    fn custom_writer_receives_events() {
        let recording = Arc::new(Recording::default());
        let logger = AuditLogger::new(recording.clone());
        logger.log(AuditEvent::new(AuditEventType::StaleExecution, ts()));
        assert_eq!(recording.0.lock().unwrap().len(), 1);
    }
}
