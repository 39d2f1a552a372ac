use crate::output::print_json;
use clap::Subcommand;
use des_core::clock::SystemClock;
use des_core::session::DeliverSession;
use serde_json::json;
use std::path::Path;

#[derive(Subcommand)]
pub enum SessionSubcommand {
    /// Open a deliver session; source writes then require a DES task
    Start { project_id: String },
    /// Close the running deliver session
    Stop,
    /// Show the running deliver session
    Status,
}

pub fn run(root: &Path, subcmd: SessionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SessionSubcommand::Start { project_id } => {
            if let Some(existing) = DeliverSession::current(root)? {
                anyhow::bail!(
                    "deliver session for '{}' already running since {}",
                    existing.project_id,
                    existing.started_at
                );
            }
            let session = DeliverSession::start(root, &project_id, &SystemClock)?;
            if json {
                print_json(&session)?;
            } else {
                println!("deliver session started for '{}'", session.project_id);
            }
        }
        SessionSubcommand::Stop => {
            let stopped = DeliverSession::stop(root)?;
            if json {
                print_json(&json!({ "stopped": stopped }))?;
            } else if stopped {
                println!("deliver session stopped");
            } else {
                println!("no deliver session running");
            }
        }
        SessionSubcommand::Status => {
            let session = DeliverSession::current(root)?;
            if json {
                print_json(&json!({ "active": session.is_some(), "session": session }))?;
            } else {
                match session {
                    Some(s) => println!("active: {} (since {})", s.project_id, s.started_at),
                    None => println!("inactive"),
                }
            }
        }
    }
    Ok(())
}
