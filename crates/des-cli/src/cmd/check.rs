use super::load_config;
use crate::output::{print_json, print_verdict};
use anyhow::Context;
use clap::Subcommand;
use des_core::clock::{Clock, SystemClock};
use des_core::paths;
use des_core::policy::{
    DesEnforcementPolicy, DesMarkers, MarkerCompletenessPolicy, StaleExecutionDetector,
};
use des_core::roadmap::Roadmap;
use des_core::vcs::{GitCli, Vcs};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum CheckSubcommand {
    /// Find phases left IN_PROGRESS past the staleness threshold
    Stale {
        #[arg(long, env = "DES_STALE_THRESHOLD_MINUTES")]
        threshold: Option<u32>,
    },
    /// Check files against a feature's declared scope (default: staged files)
    Scope {
        project_id: String,
        /// Limit the scope to one roadmap step
        #[arg(long)]
        step: Option<String>,
        files: Vec<String>,
    },
    /// Check a task prompt for DES markers and unmonitored step references
    Prompt {
        /// Read the prompt from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        /// The orchestrator picks the step, so DES-STEP-ID may be absent
        #[arg(long)]
        orchestrator: bool,
    },
}

pub fn run(root: &Path, subcmd: CheckSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        CheckSubcommand::Stale { threshold } => stale(root, threshold, json),
        CheckSubcommand::Scope {
            project_id,
            step,
            files,
        } => scope(root, &project_id, step.as_deref(), files, json),
        CheckSubcommand::Prompt { file, orchestrator } => {
            prompt(file.as_deref(), orchestrator, json)
        }
    }
}

fn stale(root: &Path, threshold: Option<u32>, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let threshold = threshold.unwrap_or(config.stale.threshold_minutes);
    let result = StaleExecutionDetector::new(threshold).scan(root, SystemClock.now())?;

    if json {
        print_json(&result)?;
    } else {
        let lines: Vec<String> = result
            .stale_executions
            .iter()
            .map(|s| {
                format!(
                    "{} {} started {} ({} min)",
                    s.step_id, s.phase_name, s.started_at, s.age_minutes
                )
            })
            .collect();
        print_verdict("stale executions", !result.is_blocked, &lines);
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
    }
    if result.is_blocked {
        anyhow::bail!("{}", result.reason);
    }
    Ok(())
}

fn scope(
    root: &Path,
    project_id: &str,
    step: Option<&str>,
    files: Vec<String>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let roadmap = Roadmap::load(&paths::roadmap_path(root, project_id))
        .with_context(|| format!("feature '{project_id}' has no roadmap"))?;
    let files = if files.is_empty() {
        GitCli::new(root)?.staged_files()?
    } else {
        files
    };

    let result = config
        .scope_validator(&roadmap.scope_patterns(step))?
        .check(root, &files);
    if json {
        print_json(&result)?;
    } else {
        let lines: Vec<String> =
            result.out_of_scope_files.iter().map(|v| v.reason.clone()).collect();
        print_verdict("scope", !result.has_violations, &lines);
    }
    if result.has_violations {
        anyhow::bail!("{}", result.reason);
    }
    Ok(())
}

fn prompt(file: Option<&Path>, orchestrator: bool, json: bool) -> anyhow::Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("cannot read prompt from stdin")?;
            buf
        }
    };

    let markers = DesMarkers::parse(&text);
    let completeness = MarkerCompletenessPolicy.check(&markers, orchestrator);
    let enforcement = DesEnforcementPolicy.check(&text);

    if json {
        print_json(&serde_json::json!({
            "markers": markers,
            "completeness": completeness,
            "enforcement": enforcement,
        }))?;
    } else {
        let mut lines = Vec::new();
        if !completeness.is_valid {
            lines.push(completeness.reason.clone());
        }
        if enforcement.enforcement_required {
            lines.push(enforcement.reason.clone());
        }
        print_verdict("prompt", lines.is_empty(), &lines);
    }

    if !completeness.is_valid {
        anyhow::bail!("{}", completeness.reason);
    }
    if enforcement.enforcement_required {
        anyhow::bail!("{}", enforcement.reason);
    }
    Ok(())
}
