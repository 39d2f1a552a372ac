pub mod check;
pub mod guard;
pub mod hook;
pub mod log;
pub mod phase;
pub mod session;
pub mod task;
pub mod validate;
pub mod verify;

use anyhow::Context;
use des_core::audit::{self, AuditEvent, AuditEventType, AuditLogger};
use des_core::clock::{Clock, SystemClock};
use des_core::completion::{CompletionResult, StepCompletionValidator};
use des_core::config::DesConfig;
use des_core::paths;
use des_core::schema::TddSchema;
use des_core::step_file::StepFile;
use std::path::Path;

/// Load the project configuration and route audit records where it says.
pub(crate) fn load_config(root: &Path) -> anyhow::Result<DesConfig> {
    let config = DesConfig::load(root)
        .with_context(|| format!("invalid {}", paths::config_path(root).display()))?;
    audit::install(AuditLogger::from_config(root, &config.audit));
    Ok(config)
}

pub(crate) fn record(
    event: AuditEventType,
    project_id: Option<&str>,
    step_id: Option<&str>,
    details: serde_json::Value,
) {
    let mut entry = AuditEvent::new(event, SystemClock.now()).details(details);
    if let Some(project) = project_id {
        entry = entry.project(project);
    }
    if let Some(step) = step_id {
        entry = entry.step(step);
    }
    audit::global().log(entry);
}

/// Step files written under an older schema are checked against the bundled
/// schema with the same phase count.
pub(crate) fn validate_step(schema: &TddSchema, step: &StepFile) -> CompletionResult {
    if step.phases().len() != schema.phases().len() {
        if let Some(legacy) = step.matching_schema() {
            return StepCompletionValidator::new(&legacy).validate_step_file(step);
        }
    }
    StepCompletionValidator::new(schema).validate_step_file(step)
}
