//! Classification of `work_dir/.git` into the three repository shapes the
//! `@git` preset cares about. This is a pure derivation over the filesystem:
//! no back-pointers, no shared state, one function.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::path_utils::absolutize;

const GITDIR_PREFIX: &str = "gitdir: ";
const COMMONDIR_FILE: &str = "commondir";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRepositoryShape {
    /// No `.git` entry at all.
    NotARepo,
    /// `.git` is a directory: a normal repository.
    Repository { git_dir: PathBuf },
    /// `.git` is a `gitdir: ` pointer file: a linked worktree. `common_dir`
    /// is the main repository's gitdir, present only when the worktree gitdir
    /// carries a `commondir` file.
    Worktree {
        git_dir: PathBuf,
        common_dir: Option<PathBuf>,
    },
}

/// Inspect `work_dir/.git`. Read-only; never creates or repairs anything.
pub fn detect(work_dir: &Path) -> Result<GitRepositoryShape> {
    let dot_git = work_dir.join(".git");
    let metadata = match fs::symlink_metadata(&dot_git) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(GitRepositoryShape::NotARepo);
        }
        Err(err) => return Err(err.into()),
    };

    if metadata.is_dir() {
        return Ok(GitRepositoryShape::Repository { git_dir: dot_git });
    }

    let content = fs::read_to_string(&dot_git)?;
    let Some(pointer) = content.strip_prefix(GITDIR_PREFIX) else {
        return Err(SandboxErr::InvalidGitFile(dot_git));
    };
    let git_dir = absolutize(Path::new(pointer.trim_end()), work_dir);

    let common_dir = match fs::read_to_string(git_dir.join(COMMONDIR_FILE)) {
        Ok(common) => Some(absolutize(Path::new(common.trim_end()), &git_dir)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    Ok(GitRepositoryShape::Worktree {
        git_dir,
        common_dir,
    })
}
