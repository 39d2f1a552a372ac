use crate::error::{DesError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,
    pub author: String,
}

/// What the hooks need from version control.
pub trait Vcs {
    /// Staged paths, relative to the repository root.
    fn staged_files(&self) -> Result<Vec<String>>;

    /// `None` in a repository with no commits yet.
    fn last_commit(&self) -> Result<Option<CommitInfo>>;
}

// ---------------------------------------------------------------------------
// GitCli
// ---------------------------------------------------------------------------

/// `git` on PATH, run in a working directory.
pub struct GitCli {
    bin: PathBuf,
    workdir: PathBuf,
}

impl GitCli {
    pub fn new(workdir: &Path) -> Result<Self> {
        let bin = which::which("git").map_err(|_| DesError::Vcs("git not found on PATH".into()))?;
        Ok(Self {
            bin,
            workdir: workdir.to_path_buf(),
        })
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        std::process::Command::new(&self.bin)
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| DesError::Vcs(format!("git {}: {e}", args.join(" "))))
    }

    fn stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DesError::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Vcs for GitCli {
    fn staged_files(&self) -> Result<Vec<String>> {
        let out = self.stdout(&["diff", "--cached", "--name-only", "--diff-filter=ACMR"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn last_commit(&self) -> Result<Option<CommitInfo>> {
        let output = self.run(&["log", "-1", "--format=%H%x1f%s%x1f%an"])?;
        if !output.status.success() {
            // Fresh repository: HEAD does not resolve yet.
            return Ok(None);
        }
        let out = String::from_utf8_lossy(&output.stdout);
        Ok(parse_commit_line(out.trim()))
    }
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.split('\u{1f}');
    let hash = parts.next().filter(|h| !h.is_empty())?;
    Some(CommitInfo {
        hash: hash.to_string(),
        subject: parts.next().unwrap_or_default().to_string(),
        author: parts.next().unwrap_or_default().to_string(),
    })
}

// ---------------------------------------------------------------------------
// StaticVcs
// ---------------------------------------------------------------------------

/// Fixed answers, for callers that already know the staged set.
#[derive(Debug, Clone, Default)]
pub struct StaticVcs {
    pub staged: Vec<String>,
    pub last_commit: Option<CommitInfo>,
}

impl Vcs for StaticVcs {
    fn staged_files(&self) -> Result<Vec<String>> {
        Ok(self.staged.clone())
    }

    fn last_commit(&self) -> Result<Option<CommitInfo>> {
        Ok(self.last_commit.clone())
    }
}
