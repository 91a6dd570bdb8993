//! The blocked-operation table. Each rule names the operation it denies and
//! the human-readable rationale written to stderr before the wrapper exits.

use thiserror::Error;

use crate::args::find_inline_alias;
use crate::args::has_flag;
use crate::args::split_global_args;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error(
        "git checkout blocked in this sandbox: it can discard uncommitted changes (use `git switch` to change branches)"
    )]
    Checkout,

    #[error("git restore blocked in this sandbox: it discards uncommitted changes")]
    Restore,

    #[error("git reset --hard blocked in this sandbox: it discards commits and working tree changes")]
    ResetHard,

    #[error("git clean --force blocked in this sandbox: it deletes untracked files")]
    CleanForce,

    #[error("git commit --no-verify blocked in this sandbox: it bypasses hooks")]
    CommitNoVerify,

    #[error("git stash {0} blocked in this sandbox: it discards stashed changes")]
    DestructiveStash(String),

    #[error("git branch -D blocked in this sandbox: it force-deletes an unmerged branch")]
    BranchForceDelete,

    #[error(
        "git push --force blocked in this sandbox: it rewrites remote history (use --force-with-lease)"
    )]
    PushForce,

    #[error("git inline alias {0} blocked in this sandbox: aliases can bypass the command policy")]
    InlineAlias(String),
}

/// Analyze a full git argv (everything after `git` itself).
pub fn check_invocation(args: &[String]) -> Result<(), PolicyViolation> {
    if let Some(alias) = find_inline_alias(args) {
        return Err(PolicyViolation::InlineAlias(alias));
    }
    match split_global_args(args) {
        Some(invocation) => check_subcommand(invocation.subcommand, invocation.args),
        // Bare `git` (or global flags only) prints usage; nothing to block.
        None => Ok(()),
    }
}

/// Apply the denylist to one subcommand and its tail.
pub fn check_subcommand(subcommand: &str, args: &[String]) -> Result<(), PolicyViolation> {
    match subcommand {
        "checkout" => Err(PolicyViolation::Checkout),
        "restore" => Err(PolicyViolation::Restore),
        "reset" if has_flag(args, &["--hard"]) => Err(PolicyViolation::ResetHard),
        "clean" if has_flag(args, &["-f", "--force"]) => Err(PolicyViolation::CleanForce),
        "commit" if has_flag(args, &["--no-verify", "-n"]) => {
            Err(PolicyViolation::CommitNoVerify)
        }
        "stash" => match first_positional(args) {
            Some(op @ ("drop" | "clear" | "pop")) => {
                Err(PolicyViolation::DestructiveStash(op.to_string()))
            }
            _ => Ok(()),
        },
        "branch" => {
            if has_flag(args, &["-D"])
                || (has_flag(args, &["-d", "--delete"]) && has_flag(args, &["-f", "--force"]))
            {
                Err(PolicyViolation::BranchForceDelete)
            } else {
                Ok(())
            }
        }
        "push" if has_flag(args, &["--force", "-f"]) => Err(PolicyViolation::PushForce),
        _ => Ok(()),
    }
}

fn first_positional(args: &[String]) -> Option<&str> {
    args.iter()
        .map(String::as_str)
        .take_while(|arg| *arg != "--")
        .find(|arg| !arg.starts_with('-'))
}
