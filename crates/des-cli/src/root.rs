use std::path::{Path, PathBuf};

/// Markers that identify a project root, most specific first.
const ROOT_MARKERS: [&str; 2] = [".nwave", ".git"];

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `DES_ROOT` env var (passed in as `explicit`)
/// 2. Nearest ancestor of cwd containing `.nwave/`
/// 3. Nearest ancestor of cwd containing `.git/`
/// 4. cwd
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    discover_from(&cwd)
}

fn discover_from(start: &Path) -> PathBuf {
    ROOT_MARKERS
        .iter()
        .find_map(|marker| {
            start
                .ancestors()
                .find(|dir| dir.join(marker).is_dir())
                .map(Path::to_path_buf)
        })
        .unwrap_or_else(|| start.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        assert_eq!(resolve_root(Some(dir.path())), dir.path());
    }

    #[test]
    fn nwave_beats_git() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let project = dir.path().join("services/auth");
        std::fs::create_dir_all(project.join(".nwave")).unwrap();
        let deep = project.join("src/deep");
        std::fs::create_dir_all(&deep).unwrap();

        assert_eq!(discover_from(&deep), project);
    }

    #[test]
    fn falls_back_to_git_then_start() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&plain).unwrap();
        assert_eq!(discover_from(&plain), plain);

        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        assert_eq!(discover_from(&plain), dir.path());
    }
}
