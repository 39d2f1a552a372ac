use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use des_core::execution_log::ExecutionLog;
use des_core::paths;
use std::path::Path;

#[derive(Subcommand)]
pub enum LogSubcommand {
    /// List the parsed events of a feature's execution log
    Events {
        project_id: String,
        #[arg(long)]
        step: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: LogSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        LogSubcommand::Events { project_id, step } => {
            events(root, &project_id, step.as_deref(), json)
        }
    }
}

fn events(root: &Path, project_id: &str, step_id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let path = paths::execution_log_path(root, project_id);
    let log = ExecutionLog::load(&path).with_context(|| format!("cannot load {}", path.display()))?;
    let events = match step_id {
        Some(id) => log.step_events(id),
        None => log.events(),
    };

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("no events recorded for '{project_id}'");
        return Ok(());
    }
    let rows = events
        .iter()
        .map(|e| {
            vec![
                e.step_id.clone(),
                e.phase_name.clone(),
                e.status.to_string(),
                e.outcome.clone(),
                e.timestamp.clone(),
                e.turns_used.map(|t| t.to_string()).unwrap_or_default(),
                e.tokens_used.map(|t| t.to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["STEP", "PHASE", "STATUS", "OUTCOME", "TIMESTAMP", "TURNS", "TOKENS"],
        rows,
    );
    Ok(())
}
