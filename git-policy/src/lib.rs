//! Analysis of git invocations for the built-in `@git` wrapper: skipping
//! git's pre-subcommand global flags, answering flag-presence queries the way
//! git's own parser would (bundled short flags, long-flag abbreviations,
//! `--` termination), and the table of blocked operations.

mod args;
mod denylist;

pub use args::GitInvocation;
pub use args::find_inline_alias;
pub use args::has_flag;
pub use args::split_global_args;
pub use denylist::PolicyViolation;
pub use denylist::check_invocation;
pub use denylist::check_subcommand;
