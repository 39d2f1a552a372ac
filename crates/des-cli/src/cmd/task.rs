use crate::output::print_json;
use clap::Subcommand;
use des_core::clock::SystemClock;
use des_core::paths;
use des_core::session::DesTaskMarker;
use serde_json::json;
use std::path::Path;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// Mark a DES-monitored task as running for a step
    Start { project_id: String, step_id: String },
    /// Clear the running task marker
    Stop,
    /// Show the running task marker
    Status,
}

pub fn run(root: &Path, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TaskSubcommand::Start {
            project_id,
            step_id,
        } => {
            if !paths::is_valid_step_id(&step_id) {
                anyhow::bail!("invalid step id '{step_id}': expected NN-NN");
            }
            let marker = DesTaskMarker::start(root, &project_id, &step_id, &SystemClock)?;
            if json {
                print_json(&marker)?;
            } else {
                println!("DES task started: {} step {}", marker.project_id, marker.step_id);
            }
        }
        TaskSubcommand::Stop => {
            let stopped = DesTaskMarker::stop(root)?;
            if json {
                print_json(&json!({ "stopped": stopped }))?;
            } else if stopped {
                println!("DES task stopped");
            } else {
                println!("no DES task running");
            }
        }
        TaskSubcommand::Status => {
            let marker = DesTaskMarker::current(root)?;
            if json {
                print_json(&json!({ "active": marker.is_some(), "task": marker }))?;
            } else {
                match marker {
                    Some(m) => println!(
                        "active: {} step {} (since {})",
                        m.project_id, m.step_id, m.started_at
                    ),
                    None => println!("inactive"),
                }
            }
        }
    }
    Ok(())
}
