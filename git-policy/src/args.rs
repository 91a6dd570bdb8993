//! Git's pre-subcommand argument grammar, reduced to what the denylist
//! needs: which global flags consume a value, where the subcommand starts,
//! and whether a given flag is present in a subcommand's tail.

/// Global flags that consume the following token as their value. The
/// `--flag=value` form carries the value in the same token.
const GLOBAL_FLAGS_WITH_VALUE: &[&str] = &[
    "-C",
    "-c",
    "--git-dir",
    "--work-tree",
    "--namespace",
    "--super-prefix",
    "--config-env",
    "--exec-path",
    "--html-path",
    "--man-path",
    "--info-path",
    "--list-cmds",
    "--attr-source",
];

/// Global flags that take no value. Unknown long flags fall through to this
/// set in the skipper.
///
/// TODO: one upstream variant documents `-p` as value-taking. `-p` is git's
/// `--paginate`, which takes none; confirm before treating it otherwise.
const GLOBAL_FLAGS_WITHOUT_VALUE: &[&str] = &[
    "--paginate",
    "-p",
    "-P",
    "--no-pager",
    "--no-replace-obj",
    "--bare",
    "--literal-pathspecs",
    "--glob-pathspecs",
    "--noglob-pathspecs",
    "--icase-pathspecs",
    "--no-optional-locks",
];

/// Short global flags whose value may be glued into the same token
/// (`-Cdir`, `-ckey=value`).
const GLUED_SHORT_FLAGS: &[&str] = &["-C", "-c"];

/// A git invocation split at the subcommand boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInvocation<'a> {
    pub subcommand: &'a str,
    pub args: &'a [String],
}

/// Skip git's global flags and return the subcommand with its tail, or
/// `None` when no non-flag token exists.
pub fn split_global_args(args: &[String]) -> Option<GitInvocation<'_>> {
    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_str();

        if !arg.starts_with('-') {
            return Some(GitInvocation {
                subcommand: arg,
                args: &args[index + 1..],
            });
        }

        if GLOBAL_FLAGS_WITH_VALUE.contains(&arg) {
            // Value in the next token.
            index += 2;
            continue;
        }
        if let Some((head, _)) = arg.split_once('=')
            && GLOBAL_FLAGS_WITH_VALUE.contains(&head)
        {
            index += 1;
            continue;
        }
        if GLUED_SHORT_FLAGS
            .iter()
            .any(|flag| arg.starts_with(flag) && arg.len() > flag.len())
        {
            index += 1;
            continue;
        }

        // Known value-less flags and unknown long flags alike.
        index += 1;
    }
    None
}

/// Inline config that smuggles an alias definition past the wrapper:
/// `-c alias.x=...`, `-calias.x=...`, `--config-env alias.x=VAR`, or the
/// `=`-joined long form. Returns the offending `alias.<name>` key.
pub fn find_inline_alias(args: &[String]) -> Option<String> {
    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_str();
        if !arg.starts_with('-') {
            // Subcommand reached; inline config can no longer appear.
            return None;
        }

        let config_value = if arg == "-c" || arg == "--config-env" {
            let value = args.get(index + 1).map(String::as_str);
            index += 2;
            value
        } else if let Some(joined) = arg.strip_prefix("--config-env=") {
            index += 1;
            Some(joined)
        } else if !arg.starts_with("--")
            && let Some(glued) = arg.strip_prefix("-c")
        {
            index += 1;
            Some(glued)
        } else {
            if GLOBAL_FLAGS_WITH_VALUE.contains(&arg) {
                index += 2;
            } else {
                index += 1;
            }
            None
        };

        if let Some(value) = config_value {
            let key = value.split('=').next().unwrap_or(value);
            if key.starts_with("alias.") {
                return Some(key.to_string());
            }
        }
    }
    None
}

/// Whether any of `wants` appears in `args`, with git's matching rules.
///
/// Long targets match exactly, as `--flag=value`, or as an unambiguous
/// abbreviation (any proper prefix). The exception: no prefix of
/// `--force-with-lease` at or below the length of `--force` matches it, so
/// `--force` can never be mistaken for the lease-guarded form. Short targets
/// match standalone or bundled (`-fu` contains `-f`). Scanning stops at `--`.
pub fn has_flag(args: &[String], wants: &[&str]) -> bool {
    for arg in args {
        if arg == "--" {
            return false;
        }
        for want in wants {
            let matched = if let Some(short) = want.strip_prefix('-').filter(|w| w.len() == 1) {
                short_flag_matches(arg, short)
            } else {
                long_flag_matches(arg, want)
            };
            if matched {
                return true;
            }
        }
    }
    false
}

fn long_flag_matches(arg: &str, target: &str) -> bool {
    let head = match arg.split_once('=') {
        Some((head, _)) => head,
        None => arg,
    };
    if !head.starts_with("--") {
        return false;
    }
    if head == target {
        return true;
    }
    if target.starts_with(head) && head.len() < target.len() {
        if target == "--force-with-lease" && head.len() <= "--force".len() {
            return false;
        }
        return true;
    }
    false
}

fn short_flag_matches(arg: &str, short: &str) -> bool {
    if arg.starts_with("--") || !arg.starts_with('-') || arg.len() < 2 {
        return false;
    }
    let bundle = &arg[1..];
    short.chars().next().is_some_and(|ch| bundle.contains(ch))
}
