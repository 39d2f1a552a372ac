//! File markers for the deliver session and the running DES task.
//!
//! Layout:
//!   .nwave/des/deliver-session.json   : present while a deliver session runs
//!   .nwave/des/des-task-active.json   : present while a DES-monitored task runs

use crate::clock::Clock;
use crate::error::Result;
use crate::{io, paths};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;

fn read_marker<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

fn write_marker<T: Serialize>(path: &Path, marker: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(marker)?;
    io::atomic_write(path, data.as_bytes())
}

// ---------------------------------------------------------------------------
// DeliverSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverSession {
    pub project_id: String,
    pub started_at: String,
}

impl DeliverSession {
    pub fn start(root: &Path, project_id: &str, clock: &dyn Clock) -> Result<Self> {
        let session = Self {
            project_id: project_id.to_string(),
            started_at: clock.now_iso(),
        };
        write_marker(&paths::deliver_session_path(root), &session)?;
        tracing::info!(project = project_id, "deliver session started");
        Ok(session)
    }

    /// Returns false when no session was running.
    pub fn stop(root: &Path) -> Result<bool> {
        io::remove_if_exists(&paths::deliver_session_path(root))
    }

    pub fn current(root: &Path) -> Result<Option<Self>> {
        read_marker(&paths::deliver_session_path(root))
    }

    pub fn is_active(root: &Path) -> bool {
        paths::deliver_session_path(root).exists()
    }
}

// ---------------------------------------------------------------------------
// DesTaskMarker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesTaskMarker {
    pub project_id: String,
    pub step_id: String,
    pub started_at: String,
}

impl DesTaskMarker {
    pub fn start(root: &Path, project_id: &str, step_id: &str, clock: &dyn Clock) -> Result<Self> {
        let marker = Self {
            project_id: project_id.to_string(),
            step_id: step_id.to_string(),
            started_at: clock.now_iso(),
        };
        write_marker(&paths::des_task_path(root), &marker)?;
        tracing::info!(project = project_id, step = step_id, "DES task started");
        Ok(marker)
    }

    pub fn stop(root: &Path) -> Result<bool> {
        io::remove_if_exists(&paths::des_task_path(root))
    }

    pub fn current(root: &Path) -> Result<Option<Self>> {
        read_marker(&paths::des_task_path(root))
    }

    pub fn is_active(root: &Path) -> bool {
        paths::des_task_path(root).exists()
    }
}
