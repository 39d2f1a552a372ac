use super::{load_config, record};
use crate::output::{print_json, print_verdict};
use anyhow::Context;
use clap::Subcommand;
use des_core::audit::AuditEventType;
use des_core::execution_log::ExecutionLog;
use des_core::paths;
use des_core::policy::DeliverIntegrityVerifier;
use des_core::roadmap::Roadmap;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Subcommand)]
pub enum VerifySubcommand {
    /// Cross-check a feature's roadmap steps against its execution log
    Deliver { project_id: String },
}

pub fn run(root: &Path, subcmd: VerifySubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        VerifySubcommand::Deliver { project_id } => deliver(root, &project_id, json),
    }
}

fn deliver(root: &Path, project_id: &str, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let schema = config.load_schema(root)?;
    let roadmap = Roadmap::load(&paths::roadmap_path(root, project_id))
        .with_context(|| format!("feature '{project_id}' has no roadmap"))?;

    // No log at all means no step was monitored.
    let log_path = paths::execution_log_path(root, project_id);
    let events = if log_path.exists() {
        ExecutionLog::load(&log_path)?.events_by_step()
    } else {
        BTreeMap::new()
    };

    let result = DeliverIntegrityVerifier::new(&schema).verify(&roadmap.step_ids(), &events);
    if json {
        print_json(&result)?;
    } else {
        let lines: Vec<String> = result.violations.iter().map(|v| v.reason.clone()).collect();
        print_verdict(&format!("deliver integrity ({project_id})"), result.is_valid, &lines);
        println!("{}", result.reason);
    }

    if !result.is_valid {
        record(
            AuditEventType::DeliverIntegrityFailed,
            Some(project_id),
            None,
            serde_json::to_value(&result)?,
        );
        anyhow::bail!("deliver integrity failed for '{project_id}'");
    }
    Ok(())
}
