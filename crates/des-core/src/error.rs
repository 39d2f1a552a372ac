use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DesError {
    #[error("schema load error: {0}")]
    SchemaLoad(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("execution log not found: {}", .0.display())]
    ExecutionLogNotFound(PathBuf),

    #[error("step file not found: {}", .0.display())]
    StepFileNotFound(PathBuf),

    #[error("roadmap not found: {}", .0.display())]
    RoadmapNotFound(PathBuf),

    #[error("unknown phase '{0}' for the active schema")]
    UnknownPhase(String),

    #[error("cannot start phase '{phase}': earlier phase '{pending}' was neither run nor skipped")]
    PhaseOutOfOrder { phase: String, pending: String },

    #[error("cannot start phase '{phase}': earlier phase '{blocker}' is blocked ({outcome})")]
    PhaseBlocked {
        phase: String,
        blocker: String,
        outcome: String,
    },

    #[error("phase '{phase}' has no running execution")]
    PhaseNotStarted { phase: String },

    #[error("invalid skip reason for phase '{phase}': {reason}")]
    InvalidSkipReason { phase: String, reason: String },

    #[error("invalid phase status: {0}")]
    InvalidStatus(String),

    #[error("version control error: {0}")]
    Vcs(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Glob(#[from] globset::Error),
}

pub type Result<T> = std::result::Result<T, DesError>;
