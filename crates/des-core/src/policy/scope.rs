use super::build_globset;
use crate::error::Result;
use crate::paths;
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// ScopeCheckResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeViolation {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCheckResult {
    pub has_violations: bool,
    pub files_checked: usize,
    pub out_of_scope_files: Vec<ScopeViolation>,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// ScopeBoundaryValidator
// ---------------------------------------------------------------------------

/// Checks changed files against the patterns a roadmap declares in scope.
#[derive(Debug, Clone)]
pub struct ScopeBoundaryValidator {
    patterns: Vec<String>,
    matcher: GlobSet,
}

impl ScopeBoundaryValidator {
    /// `declared` comes from the roadmap; `always_allowed` from configuration.
    pub fn new<S: AsRef<str>>(declared: &[S], always_allowed: &[S]) -> Result<Self> {
        let patterns: Vec<String> = declared
            .iter()
            .chain(always_allowed.iter())
            .map(|p| p.as_ref().to_string())
            .collect();
        let matcher = build_globset(&patterns)?;
        Ok(Self { patterns, matcher })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_in_scope(&self, root: &Path, file: &str) -> bool {
        self.matcher.is_match(paths::normalize_repo_path(root, file))
    }

    pub fn check<S: AsRef<str>>(&self, root: &Path, files: &[S]) -> ScopeCheckResult {
        let out_of_scope_files: Vec<ScopeViolation> = files
            .iter()
            .map(|f| paths::normalize_repo_path(root, f.as_ref()))
            .filter(|f| !f.is_empty() && !self.matcher.is_match(f))
            .map(|file| ScopeViolation {
                reason: format!("{file} is not declared in the roadmap scope"),
                file,
            })
            .collect();

        let reason = if out_of_scope_files.is_empty() {
            format!("all {} file(s) within declared scope", files.len())
        } else {
            let names: Vec<&str> = out_of_scope_files.iter().map(|v| v.file.as_str()).collect();
            format!(
                "{} file(s) outside declared scope: {}",
                out_of_scope_files.len(),
                names.join(", ")
            )
        };

        ScopeCheckResult {
            has_violations: !out_of_scope_files.is_empty(),
            files_checked: files.len(),
            out_of_scope_files,
            reason,
        }
    }
}
