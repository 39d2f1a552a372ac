use super::load_config;
use crate::output::{print_json, print_verdict};
use clap::Subcommand;
use des_core::clock::{Clock, SystemClock};
use des_core::config::DesConfig;
use des_core::orchestrator::PhaseOrchestrator;
use des_core::paths;
use des_core::step_file::Extension;
use des_core::types::OUTCOME_PASS;
use std::path::Path;

#[derive(Subcommand)]
pub enum PhaseSubcommand {
    /// Start a phase and arm its timeout monitor
    Start {
        project_id: String,
        step_id: String,
        phase: String,
    },
    /// Report turns used so far and print any timeout warnings now due
    Poll {
        project_id: String,
        step_id: String,
        #[arg(long, default_value_t = 0)]
        turns: u32,
        /// Check turns against this task type's ceiling
        #[arg(long)]
        task_type: Option<String>,
    },
    /// Finish a running phase and append its event to the execution log
    Complete {
        project_id: String,
        step_id: String,
        phase: String,
        #[arg(long, default_value = OUTCOME_PASS)]
        outcome: String,
        #[arg(long)]
        turns: Option<u32>,
        #[arg(long)]
        tokens: Option<u64>,
    },
    /// Skip a phase with a prefixed reason (e.g. "NOT_APPLICABLE: ...")
    Skip {
        project_id: String,
        step_id: String,
        phase: String,
        #[arg(required = true)]
        reason: Vec<String>,
    },
    /// Grant a phase extra turns or minutes
    Extend {
        project_id: String,
        step_id: String,
        phase: String,
        #[arg(long, default_value_t = 0)]
        turns: u32,
        #[arg(long, default_value_t = 0)]
        minutes: u32,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        approved_by: String,
    },
    /// Validate the step's log and mark it COMPLETED if every phase is proven
    Finalize { project_id: String, step_id: String },
}

pub fn run(root: &Path, subcmd: PhaseSubcommand, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    match subcmd {
        PhaseSubcommand::Start {
            project_id,
            step_id,
            phase,
        } => {
            let mut orch = open(root, &config, &project_id, &step_id)?;
            orch.start_phase(&phase)?;
            if json {
                print_json(&orch.step().phase(&phase))?;
            } else {
                println!("{step_id}: {phase} started");
            }
        }
        PhaseSubcommand::Poll {
            project_id,
            step_id,
            turns,
            task_type,
        } => {
            let mut orch = open(root, &config, &project_id, &step_id)?;
            if let Some(task_type) = task_type {
                orch = orch.with_task_type(task_type);
            }
            let report = orch.poll(turns)?;
            if json {
                print_json(&report)?;
            } else {
                match &report.phase {
                    Some(phase) => println!("{step_id}: {phase} running"),
                    None => println!("{step_id}: no phase running"),
                }
                for warning in &report.warnings {
                    println!("{}", warning.message);
                }
                if let Some(check) = report.turn_check.as_ref().filter(|c| c.exceeded) {
                    println!("{}", check.reason);
                }
            }
        }
        PhaseSubcommand::Complete {
            project_id,
            step_id,
            phase,
            outcome,
            turns,
            tokens,
        } => {
            let mut orch = open(root, &config, &project_id, &step_id)?;
            let event = orch.complete_phase(&phase, &outcome, turns, tokens)?;
            if json {
                print_json(&event)?;
            } else {
                println!("{}", event.to_line());
            }
        }
        PhaseSubcommand::Skip {
            project_id,
            step_id,
            phase,
            reason,
        } => {
            let mut orch = open(root, &config, &project_id, &step_id)?;
            let event = orch.skip_phase(&phase, &reason.join(" "))?;
            if json {
                print_json(&event)?;
            } else {
                println!("{}", event.to_line());
            }
        }
        PhaseSubcommand::Extend {
            project_id,
            step_id,
            phase,
            turns,
            minutes,
            reason,
            approved_by,
        } => {
            if turns == 0 && minutes == 0 {
                anyhow::bail!("an extension needs --turns or --minutes");
            }
            let extension = Extension {
                timestamp: SystemClock.now_iso(),
                reason,
                additional_turns: turns,
                additional_minutes: minutes,
                approved_by,
            };
            let mut orch = open(root, &config, &project_id, &step_id)?;
            orch.grant_extension(&phase, extension.clone())?;
            if json {
                print_json(&extension)?;
            } else {
                println!("{step_id}: {phase} extended by {turns} turn(s), {minutes} min");
            }
        }
        PhaseSubcommand::Finalize {
            project_id,
            step_id,
        } => {
            let mut orch = open(root, &config, &project_id, &step_id)?;
            let result = orch.finalize()?;
            if json {
                print_json(&result)?;
            } else {
                let mut lines = result.missing_phases.clone();
                lines.extend(
                    result
                        .blocking_phases
                        .iter()
                        .map(|b| format!("{}: {}", b.phase, b.outcome)),
                );
                print_verdict(&format!("{step_id} {}", result.status), result.is_complete, &lines);
            }
            if !result.is_complete {
                anyhow::bail!("{}", result.reason);
            }
        }
    }
    Ok(())
}

fn open(
    root: &Path,
    config: &DesConfig,
    project_id: &str,
    step_id: &str,
) -> anyhow::Result<PhaseOrchestrator> {
    if !paths::is_valid_step_id(step_id) {
        anyhow::bail!("invalid step id '{step_id}': expected NN-NN");
    }
    Ok(PhaseOrchestrator::from_config(root, config, project_id, step_id)?)
}
