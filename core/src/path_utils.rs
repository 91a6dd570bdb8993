use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem. Non-existent paths must survive resolution, so this cannot be
/// `fs::canonicalize`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => normalized.push(Component::RootDir),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            Component::Normal(part) => normalized.push(part),
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(Component::CurDir);
    }
    normalized
}

/// Make `path` absolute against `base`, then normalize it lexically.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}

/// Expand a leading `~` or `~/` against `home_dir`. Other users' homes
/// (`~alice`) are not expanded.
pub fn expand_tilde(pattern: &str, home_dir: &Path) -> PathBuf {
    if pattern == "~" {
        home_dir.to_path_buf()
    } else if let Some(rest) = pattern.strip_prefix("~/") {
        home_dir.join(rest)
    } else {
        PathBuf::from(pattern)
    }
}

/// `fs::canonicalize` when the path exists; otherwise canonicalize the
/// deepest existing ancestor and re-append the missing tail, so symlinked
/// parents still resolve for paths the sandboxed command may create later.
pub fn realpath_best_effort(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }

    let mut missing = Vec::new();
    let mut current = path.to_path_buf();
    loop {
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                if let Some(name) = current.file_name() {
                    missing.push(name.to_os_string());
                }
                if let Ok(resolved) = parent.canonicalize() {
                    let mut rebuilt = resolved;
                    for part in missing.iter().rev() {
                        rebuilt.push(part);
                    }
                    return rebuilt;
                }
                current = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_resolves_dot_and_dotdot() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize_path(Path::new("/a/../..")), PathBuf::from("/"));
    }

    #[test]
    fn absolutize_joins_relative_paths() {
        assert_eq!(
            absolutize(Path::new("sub/dir"), Path::new("/work")),
            PathBuf::from("/work/sub/dir")
        );
        assert_eq!(
            absolutize(Path::new("/abs"), Path::new("/work")),
            PathBuf::from("/abs")
        );
    }

    #[test]
    fn tilde_expands_only_bare_home() {
        let home = Path::new("/home/u");
        assert_eq!(expand_tilde("~", home), PathBuf::from("/home/u"));
        assert_eq!(expand_tilde("~/.ssh", home), PathBuf::from("/home/u/.ssh"));
        assert_eq!(expand_tilde("~alice/x", home), PathBuf::from("~alice/x"));
    }

    #[test]
    fn realpath_keeps_missing_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonicalize");
        let target = dir.path().join("not").join("yet");
        assert_eq!(realpath_best_effort(&target), root.join("not/yet"));
    }
}
