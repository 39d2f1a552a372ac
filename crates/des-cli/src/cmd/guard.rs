use super::{load_config, record};
use crate::output::print_json;
use des_core::audit::AuditEventType;
use des_core::paths;
use des_core::session::{DeliverSession, DesTaskMarker};
use serde_json::json;
use std::path::Path;

/// Exit 1 when the session guard blocks a write to `path`.
pub fn run(root: &Path, path: &str, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let session = DeliverSession::current(root)?;
    let task_active = DesTaskMarker::is_active(root);

    let rel = paths::normalize_repo_path(root, path);
    let decision = config
        .session_guard()?
        .check(&rel, session.is_some(), task_active);

    if json {
        print_json(&decision)?;
    } else if decision.blocked {
        println!("BLOCKED {}: {}", decision.path, decision.reason);
    } else {
        println!("allowed {}: {}", decision.path, decision.reason);
    }

    if decision.blocked {
        record(
            AuditEventType::SessionGuardBlocked,
            session.as_ref().map(|s| s.project_id.as_str()),
            None,
            json!({ "path": decision.path }),
        );
        anyhow::bail!("{}", decision.reason);
    }
    Ok(())
}
