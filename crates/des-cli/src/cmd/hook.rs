use super::{load_config, record, validate_step};
use crate::output::{print_json, print_verdict};
use anyhow::Context;
use clap::Subcommand;
use des_core::audit::AuditEventType;
use des_core::clock::{Clock, SystemClock};
use des_core::completion::CompletionResult;
use des_core::execution_log::ExecutionLog;
use des_core::paths;
use des_core::policy::{
    DeliverIntegrityResult, DeliverIntegrityVerifier, ScopeCheckResult, StaleCheckResult,
    StaleExecutionDetector,
};
use des_core::roadmap::Roadmap;
use des_core::session::DesTaskMarker;
use des_core::step_file::StepFile;
use des_core::types::STEP_COMPLETED;
use des_core::vcs::{CommitInfo, GitCli, StaticVcs, Vcs};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

#[derive(Subcommand)]
pub enum HookSubcommand {
    /// Block commits with stale phases, unproven completions, or out-of-scope files
    PreCommit {
        /// Check these paths instead of asking git for the staged set
        #[arg(long = "files", num_args = 1..)]
        files: Vec<String>,
        /// Minutes after which an IN_PROGRESS phase counts as abandoned
        #[arg(long, env = "DES_STALE_THRESHOLD_MINUTES")]
        stale_threshold: Option<u32>,
    },
    /// Block pushes of features whose roadmap steps were not all logged
    PrePush,
}

pub fn run(root: &Path, subcmd: HookSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        HookSubcommand::PreCommit {
            files,
            stale_threshold,
        } => pre_commit(root, files, stale_threshold, json),
        HookSubcommand::PrePush => pre_push(root, json),
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ProjectIntegrity {
    project_id: String,
    #[serde(flatten)]
    result: DeliverIntegrityResult,
}

#[derive(Serialize)]
struct HookReport {
    hook: &'static str,
    passed: bool,
    violations: Vec<String>,
    warnings: Vec<String>,
    /// HEAD when the hook ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    head: Option<CommitInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stale: Option<StaleCheckResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    completion: Vec<CompletionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<ScopeCheckResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    integrity: Vec<ProjectIntegrity>,
}

impl HookReport {
    fn new(hook: &'static str) -> Self {
        Self {
            hook,
            passed: true,
            violations: Vec::new(),
            warnings: Vec::new(),
            head: None,
            stale: None,
            completion: Vec::new(),
            scope: None,
            integrity: Vec::new(),
        }
    }

    /// Print the report, audit the verdict, and fail when anything blocked.
    fn finish(mut self, json: bool) -> anyhow::Result<()> {
        self.passed = self.violations.is_empty();
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
        if json {
            print_json(&self)?;
        } else {
            print_verdict(&format!("DES {}", self.hook), self.passed, &self.violations);
        }

        let details = json!({
            "hook": self.hook,
            "head": self.head,
            "violations": self.violations,
        });
        if self.passed {
            record(AuditEventType::HookPassed, None, None, details);
            Ok(())
        } else {
            record(AuditEventType::HookBlocked, None, None, details);
            anyhow::bail!("{} blocked: {} violation(s)", self.hook, self.violations.len())
        }
    }
}

/// Commit metadata for the audit record. A lookup failure only costs the
/// record its `head` field.
fn head_commit(vcs: &dyn Vcs, report: &mut HookReport) {
    match vcs.last_commit() {
        Ok(head) => report.head = head,
        Err(e) => report.warnings.push(format!("could not read last commit: {e}")),
    }
}

fn not_configured(hook: &str) -> anyhow::Result<()> {
    eprintln!(
        "warning: DES is not configured in this project (no .nwave/ or docs/feature/); \
         {hook} checks skipped"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// pre-commit
// ---------------------------------------------------------------------------

fn pre_commit(
    root: &Path,
    files: Vec<String>,
    stale_threshold: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    if !paths::is_des_project(root) {
        return not_configured("pre-commit");
    }
    let config = load_config(root)?;
    let schema = config.load_schema(root).context("failed to load TDD schema")?;
    let mut report = HookReport::new("pre-commit");

    // 1. Abandoned phases anywhere in the project.
    let threshold = stale_threshold.unwrap_or(config.stale.threshold_minutes);
    let stale = StaleExecutionDetector::new(threshold)
        .scan(root, SystemClock.now())
        .context("stale execution scan failed")?;
    report.warnings.extend(stale.warnings.iter().cloned());
    for s in &stale.stale_executions {
        report.violations.push(format!(
            "stale execution: step {} phase {} has been IN_PROGRESS for {} min ({})",
            s.step_id,
            s.phase_name,
            s.age_minutes,
            s.step_file.display()
        ));
        record(
            AuditEventType::StaleExecution,
            None,
            Some(&s.step_id),
            json!({ "phase": s.phase_name, "age_minutes": s.age_minutes }),
        );
    }
    report.stale = Some(stale);

    // 2. Staged step files that claim completion must prove it.
    let vcs: Box<dyn Vcs> = if files.is_empty() {
        Box::new(GitCli::new(root)?)
    } else {
        Box::new(StaticVcs {
            staged: files,
            last_commit: None,
        })
    };
    let staged = vcs.staged_files().context("failed to list staged files")?;
    head_commit(vcs.as_ref(), &mut report);

    for file in &staged {
        let rel = paths::normalize_repo_path(root, file);
        if paths::step_file_project(&rel).is_none() {
            continue;
        }
        let path = root.join(&rel);
        if !path.exists() {
            continue;
        }
        let step = match StepFile::load(&path) {
            Ok(step) => step,
            Err(e) => {
                report.violations.push(format!("{rel}: unreadable step file: {e}"));
                continue;
            }
        };
        if step.state.status != STEP_COMPLETED {
            continue;
        }
        let result = validate_step(&schema, &step);
        if !result.is_complete {
            report.violations.push(format!(
                "{rel}: marked {STEP_COMPLETED} but {}",
                result.reason
            ));
        }
        report.completion.push(result);
    }

    // 3. Scope of the running DES task.
    if let Some(task) = DesTaskMarker::current(root).context("failed to read DES task marker")? {
        let roadmap_path = paths::roadmap_path(root, &task.project_id);
        if roadmap_path.exists() {
            let roadmap = Roadmap::load(&roadmap_path)?;
            if roadmap.step(&task.step_id).is_some() {
                let patterns = roadmap.scope_patterns(Some(&task.step_id));
                let validator = config.scope_validator(&patterns)?;
                let scope = validator.check(root, &staged);
                for v in &scope.out_of_scope_files {
                    report.violations.push(format!("scope: {}", v.reason));
                }
                if scope.has_violations {
                    record(
                        AuditEventType::ScopeViolation,
                        Some(&task.project_id),
                        Some(&task.step_id),
                        json!({ "files": scope.out_of_scope_files }),
                    );
                }
                report.scope = Some(scope);
            }
        }
    }

    report.finish(json)
}

// ---------------------------------------------------------------------------
// pre-push
// ---------------------------------------------------------------------------

fn pre_push(root: &Path, json: bool) -> anyhow::Result<()> {
    if !paths::is_des_project(root) {
        return not_configured("pre-push");
    }
    let config = load_config(root)?;
    let schema = config.load_schema(root).context("failed to load TDD schema")?;
    let mut report = HookReport::new("pre-push");
    match GitCli::new(root) {
        Ok(git) => head_commit(&git, &mut report),
        Err(e) => report.warnings.push(format!("could not read last commit: {e}")),
    }

    for project_id in paths::list_feature_ids(root)? {
        let roadmap_path = paths::roadmap_path(root, &project_id);
        let log_path = paths::execution_log_path(root, &project_id);
        if !roadmap_path.exists() || !log_path.exists() {
            continue;
        }
        let roadmap = Roadmap::load(&roadmap_path)
            .with_context(|| format!("failed to read {}", roadmap_path.display()))?;
        let log = ExecutionLog::load(&log_path)
            .with_context(|| format!("failed to read {}", log_path.display()))?;

        let result = DeliverIntegrityVerifier::new(&schema)
            .verify(&roadmap.step_ids(), &log.events_by_step());
        if !result.is_valid {
            for v in &result.violations {
                report.violations.push(format!("{project_id}: {}", v.reason));
            }
            record(
                AuditEventType::DeliverIntegrityFailed,
                Some(&project_id),
                None,
                serde_json::to_value(&result)?,
            );
        }
        report.integrity.push(ProjectIntegrity { project_id, result });
    }

    report.finish(json)
}
