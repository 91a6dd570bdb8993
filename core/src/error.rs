use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxErr>;

#[derive(Error, Debug)]
pub enum SandboxErr {
    /// Anything wrong with the layered configuration: syntax, unknown fields,
    /// duplicate `.json`/`.jsonc` siblings, malformed `--cmd` overrides, or a
    /// preset rule attached to the wrong command key. Always fatal pre-launch.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown preset {name} (available: {})", .available.join(", "))]
    UnknownPreset {
        name: String,
        available: Vec<String>,
    },

    /// `.git` exists as a file but does not carry a `gitdir: ` pointer.
    #[error("invalid git file {}: expected content starting with \"gitdir: \"", .0.display())]
    InvalidGitFile(PathBuf),

    /// The real binary is missing under `<runtime-root>/bin/` while a preset
    /// wrapper requires it.
    #[error("{0}: command not available")]
    BinaryNotFound(String),

    #[error("wrap-binary can only run inside sandbox")]
    NotInSandbox,

    #[error(
        "failed to launch sandbox executor: {0}; check that unprivileged user namespaces are enabled (kernel.unprivileged_userns_clone)"
    )]
    Execution(String),

    /// The child was killed through the cancellation pathway. Reported
    /// distinctly from a plain non-zero exit.
    #[error("sandboxed command was cancelled")]
    Cancelled,

    /// The child was terminated by a signal outside our own kill pathway.
    #[error("sandboxed command was terminated by signal {0}")]
    Signal(i32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
