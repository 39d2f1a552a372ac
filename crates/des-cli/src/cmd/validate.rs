use super::{load_config, validate_step};
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use des_core::completion::{CompletionResult, StepCompletionValidator};
use des_core::execution_log::ExecutionLog;
use des_core::step_file::StepFile;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ValidateSubcommand {
    /// Check a step file's own phase log
    Step { path: PathBuf },
    /// Check every step (or one) recorded in an execution log
    Log {
        path: PathBuf,
        #[arg(long)]
        step: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: ValidateSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ValidateSubcommand::Step { path } => step(root, &root.join(path), json),
        ValidateSubcommand::Log { path, step } => {
            log(root, &root.join(path), step.as_deref(), json)
        }
    }
}

fn step(root: &Path, path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let step = StepFile::load(path).with_context(|| format!("cannot load {}", path.display()))?;
    let schema = config.load_schema(root)?;
    report(&[validate_step(&schema, &step)], json)
}

fn log(root: &Path, path: &Path, step_id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let schema = config.load_schema(root)?;
    let log = ExecutionLog::load(path).with_context(|| format!("cannot load {}", path.display()))?;
    let validator = StepCompletionValidator::new(&schema);

    let results: Vec<CompletionResult> = match step_id {
        Some(id) => vec![validator.validate(id, &log.step_events(id))],
        None => log
            .events_by_step()
            .iter()
            .map(|(id, events)| validator.validate(id, events))
            .collect(),
    };
    report(&results, json)
}

fn report(results: &[CompletionResult], json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&results)?;
    } else {
        let rows = results
            .iter()
            .map(|r| vec![r.step_id.clone(), r.status.to_string(), r.reason.clone()])
            .collect();
        print_table(&["STEP", "STATUS", "REASON"], rows);
    }
    let incomplete = results.iter().filter(|r| !r.is_complete).count();
    if incomplete > 0 {
        anyhow::bail!("{incomplete} step(s) not complete");
    }
    Ok(())
}
