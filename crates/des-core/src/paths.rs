use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const NWAVE_DIR: &str = ".nwave";
pub const DES_STATE_DIR: &str = ".nwave/des";
pub const FEATURES_DIR: &str = "docs/feature";
pub const STEPS_DIR: &str = "steps";

pub const CONFIG_FILE: &str = ".nwave/des-config.yaml";
pub const DELIVER_SESSION_FILE: &str = ".nwave/des/deliver-session.json";
pub const DES_TASK_FILE: &str = ".nwave/des/des-task-active.json";
pub const DEFAULT_AUDIT_DIR: &str = ".nwave/des/audit";

pub const ROADMAP_FILE: &str = "roadmap.yaml";
pub const EXECUTION_LOG_FILE: &str = "execution-log.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn feature_dir(root: &Path, project_id: &str) -> PathBuf {
    root.join(FEATURES_DIR).join(project_id)
}

pub fn roadmap_path(root: &Path, project_id: &str) -> PathBuf {
    feature_dir(root, project_id).join(ROADMAP_FILE)
}

pub fn execution_log_path(root: &Path, project_id: &str) -> PathBuf {
    feature_dir(root, project_id).join(EXECUTION_LOG_FILE)
}

pub fn steps_dir(root: &Path, project_id: &str) -> PathBuf {
    feature_dir(root, project_id).join(STEPS_DIR)
}

pub fn step_file_path(root: &Path, project_id: &str, step_id: &str) -> PathBuf {
    steps_dir(root, project_id).join(format!("{step_id}.json"))
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn deliver_session_path(root: &Path) -> PathBuf {
    root.join(DELIVER_SESSION_FILE)
}

pub fn des_task_path(root: &Path) -> PathBuf {
    root.join(DES_TASK_FILE)
}

/// True when the project carries any DES state at all.
pub fn is_des_project(root: &Path) -> bool {
    root.join(NWAVE_DIR).is_dir() || root.join(FEATURES_DIR).is_dir()
}

/// Project ids with a directory under `docs/feature/`, sorted.
pub fn list_feature_ids(root: &Path) -> std::io::Result<Vec<String>> {
    let dir = root.join(FEATURES_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            ids.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Normalize a repository path for pattern matching: forward slashes,
/// relative to `root` when absolute, no leading `./`.
pub fn normalize_repo_path(root: &Path, path: &str) -> String {
    let p = Path::new(path);
    let rel = if p.is_absolute() {
        p.strip_prefix(root).unwrap_or(p)
    } else {
        p
    };
    let s = rel.to_string_lossy().replace('\\', "/");
    let mut s = s.as_str();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.to_string()
}

/// The project id of a repository-relative step file path
/// (`docs/feature/<project>/steps/<id>.json`), or `None` for any other path.
pub fn step_file_project(rel_path: &str) -> Option<&str> {
    let rest = rel_path.strip_prefix(FEATURES_DIR)?.strip_prefix('/')?;
    let (project, rest) = rest.split_once('/')?;
    let file = rest.strip_prefix(STEPS_DIR)?.strip_prefix('/')?;
    if project.is_empty() || file.contains('/') || !file.ends_with(".json") {
        return None;
    }
    Some(project)
}

// ---------------------------------------------------------------------------
// Step id validation
// ---------------------------------------------------------------------------

static STEP_ID_RE: OnceLock<Regex> = OnceLock::new();

fn step_id_re() -> &'static Regex {
    STEP_ID_RE.get_or_init(|| Regex::new(r"^[0-9]{2}-[0-9]{2}$").unwrap())
}

/// Step ids take the `NN-NN` form (phase number, step number).
pub fn is_valid_step_id(step_id: &str) -> bool {
    step_id_re().is_match(step_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn valid_step_ids() {
        for id in ["01-01", "02-13", "99-99"] {
            assert!(is_valid_step_id(id), "expected valid: {id}");
        }
    }

    #[test]
    fn invalid_step_ids() {
        let arabic_indic = "\u{0660}\u{0661}-\u{0660}\u{0661}";
        for id in ["", "1-01", "01-1", "01_01", "2026-02-09", "ab-cd", arabic_indic] {
            assert!(!is_valid_step_id(id), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.nwave/des-config.yaml")
        );
        assert_eq!(
            execution_log_path(root, "auth"),
            PathBuf::from("/tmp/proj/docs/feature/auth/execution-log.yaml")
        );
        assert_eq!(
            step_file_path(root, "auth", "01-02"),
            PathBuf::from("/tmp/proj/docs/feature/auth/steps/01-02.json")
        );
    }

    #[test]
    fn normalize_strips_root_and_dot_prefix() {
        let root = Path::new("/repo");
        assert_eq!(normalize_repo_path(root, "/repo/src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_repo_path(root, "./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_repo_path(root, "src/lib.rs"), "src/lib.rs");
    }

    #[test]
    fn list_feature_ids_sorted_dirs_only() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/feature/zeta")).unwrap();
        std::fs::create_dir_all(dir.path().join("docs/feature/alpha")).unwrap();
        std::fs::write(dir.path().join("docs/feature/README.md"), "x").unwrap();
        let ids = list_feature_ids(dir.path()).unwrap();
        assert_eq!(ids, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn des_project_detection() {
        let dir = TempDir::new().unwrap();
        assert!(!is_des_project(dir.path()));
        std::fs::create_dir_all(dir.path().join(".nwave")).unwrap();
        assert!(is_des_project(dir.path()));
    }

    #[test]
    fn step_file_project_only_for_step_files() {
        assert_eq!(step_file_project("docs/feature/auth/steps/01-01.json"), Some("auth"));
        assert_eq!(step_file_project("docs/feature/auth/roadmap.yaml"), None);
        assert_eq!(step_file_project("docs/feature/auth/steps/old/01-01.json"), None);
        assert_eq!(step_file_project("src/steps/01-01.json"), None);
    }
}
