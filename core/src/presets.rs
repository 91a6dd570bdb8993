//! The built-in filesystem presets and their expansion.
//!
//! The registry is a closed set fixed at compile time. Simple presets are
//! pure path-set builders over a [`PresetContext`]; the two composite presets
//! (`@lint/all`, `@all`) expand their members by calling the peer resolver
//! functions directly, never re-entering the registry, so adding another
//! composite cannot introduce a cycle.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::git_shape::GitRepositoryShape;
use crate::git_shape::detect;

pub const PRESET_BASE: &str = "base";
pub const PRESET_CACHES: &str = "caches";
pub const PRESET_GIT: &str = "git";
pub const PRESET_LINT_TS: &str = "lint/ts";
pub const PRESET_LINT_GO: &str = "lint/go";
pub const PRESET_LINT_PYTHON: &str = "lint/python";
pub const PRESET_LINT_ALL: &str = "lint/all";
pub const PRESET_ALL: &str = "all";

/// Context presets resolve against. `loaded_config_paths` are the config
/// files actually read this invocation; `@base` pins them read-only so the
/// sandbox cannot rewrite its own policy.
#[derive(Debug, Clone)]
pub struct PresetContext {
    pub home_dir: PathBuf,
    pub work_dir: PathBuf,
    pub loaded_config_paths: Vec<PathBuf>,
}

/// Path sets produced by preset resolution. All entries are absolute;
/// non-existent entries pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetPaths {
    pub ro: Vec<PathBuf>,
    pub rw: Vec<PathBuf>,
    pub exclude: Vec<PathBuf>,
}

impl PresetPaths {
    fn extend(&mut self, other: PresetPaths) {
        self.ro.extend(other.ro);
        self.rw.extend(other.rw);
        self.exclude.extend(other.exclude);
    }
}

type Resolver = fn(&PresetContext, &BTreeSet<String>) -> Result<PresetPaths>;

pub struct Preset {
    pub name: &'static str,
    pub description: &'static str,
    pub composite: bool,
    resolve: Resolver,
}

/// Every preset the tool knows about. Order here is the `--list-presets`
/// display order.
pub const PRESETS: &[Preset] = &[
    Preset {
        name: PRESET_BASE,
        description: "writable workspace and /tmp, read-only home, secrets hidden",
        composite: false,
        resolve: resolve_base,
    },
    Preset {
        name: PRESET_CACHES,
        description: "writable language/tool caches under the home directory",
        composite: false,
        resolve: resolve_caches,
    },
    Preset {
        name: PRESET_GIT,
        description: "read-only git hooks and config for the current repository",
        composite: false,
        resolve: resolve_git,
    },
    Preset {
        name: PRESET_LINT_TS,
        description: "read-only TypeScript/JavaScript lint and formatter configs",
        composite: false,
        resolve: resolve_lint_ts,
    },
    Preset {
        name: PRESET_LINT_GO,
        description: "read-only Go lint configs",
        composite: false,
        resolve: resolve_lint_go,
    },
    Preset {
        name: PRESET_LINT_PYTHON,
        description: "read-only Python lint and formatter configs",
        composite: false,
        resolve: resolve_lint_python,
    },
    Preset {
        name: PRESET_LINT_ALL,
        description: "all lint presets",
        composite: true,
        resolve: resolve_lint_all,
    },
    Preset {
        name: PRESET_ALL,
        description: "base, caches, git and all lint presets",
        composite: true,
        resolve: resolve_all,
    },
];

pub fn find_preset(name: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|preset| preset.name == name)
}

/// Sorted preset names, used by the unknown-preset error message.
pub fn available_names() -> Vec<String> {
    let mut names: Vec<String> = PRESETS
        .iter()
        .map(|preset| format!("@{}", preset.name))
        .collect();
    names.sort();
    names
}

/// Expand an ordered list of `@name` / `!@name` tokens into merged preset
/// paths. Last mention wins: a later `@x` re-enables what an earlier `!@x`
/// disabled, and vice versa. An empty token list behaves as `["@all"]`, and
/// a list that only disables presets subtracts them from that same implicit
/// `@all`.
///
/// Deduplication is deliberately not performed here; overlap resolution is
/// the path-access resolver's job.
pub fn expand_presets(tokens: &[String], ctx: &PresetContext) -> Result<PresetPaths> {
    let mut enabled: Vec<String> = Vec::new();
    let mut disabled: BTreeSet<String> = BTreeSet::new();

    for token in tokens {
        if let Some(name) = token.strip_prefix("!@") {
            require_known(name)?;
            enabled.retain(|enabled_name| enabled_name != name);
            disabled.insert(name.to_string());
        } else if let Some(name) = token.strip_prefix('@') {
            require_known(name)?;
            if !enabled.iter().any(|enabled_name| enabled_name == name) {
                enabled.push(name.to_string());
            }
            disabled.remove(name);
        } else {
            return Err(SandboxErr::Config(format!(
                "preset token {token:?} must start with '@' or '!@'"
            )));
        }
    }

    if enabled.is_empty() && !disabled.contains(PRESET_ALL) {
        enabled.push(PRESET_ALL.to_string());
    }

    let mut paths = PresetPaths::default();
    for name in &enabled {
        let preset = find_preset(name).ok_or_else(|| unknown(name))?;
        paths.extend((preset.resolve)(ctx, &disabled)?);
    }
    Ok(paths)
}

fn require_known(name: &str) -> Result<()> {
    if find_preset(name).is_none() {
        return Err(unknown(name));
    }
    Ok(())
}

fn unknown(name: &str) -> SandboxErr {
    SandboxErr::UnknownPreset {
        name: format!("@{name}"),
        available: available_names(),
    }
}

fn resolve_base(ctx: &PresetContext, _disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    let mut ro = vec![
        ctx.home_dir.clone(),
        ctx.work_dir.join(".agent-sandbox.json"),
        ctx.work_dir.join(".agent-sandbox.jsonc"),
    ];
    ro.extend(ctx.loaded_config_paths.iter().cloned());

    Ok(PresetPaths {
        ro,
        rw: vec![ctx.work_dir.clone(), PathBuf::from("/tmp")],
        exclude: vec![
            ctx.home_dir.join(".ssh"),
            ctx.home_dir.join(".gnupg"),
            ctx.home_dir.join(".aws"),
        ],
    })
}

fn resolve_caches(ctx: &PresetContext, _disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    Ok(PresetPaths {
        rw: vec![
            ctx.home_dir.join(".cache"),
            ctx.home_dir.join(".bun"),
            ctx.home_dir.join("go"),
            ctx.home_dir.join(".npm"),
            ctx.home_dir.join(".cargo"),
        ],
        ..Default::default()
    })
}

/// The only preset that touches the filesystem: a read-only inspection of
/// `work_dir/.git`. Not a repository is not an error.
fn resolve_git(ctx: &PresetContext, _disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    let ro = match detect(&ctx.work_dir)? {
        GitRepositoryShape::NotARepo => Vec::new(),
        GitRepositoryShape::Repository { git_dir } => {
            vec![git_dir.join("hooks"), git_dir.join("config")]
        }
        GitRepositoryShape::Worktree {
            git_dir,
            common_dir,
        } => {
            let mut ro = vec![git_dir.join("hooks"), git_dir.join("config")];
            if let Some(common_dir) = common_dir {
                ro.push(common_dir.join("hooks"));
                ro.push(common_dir.join("config"));
            }
            ro
        }
    };
    Ok(PresetPaths {
        ro,
        ..Default::default()
    })
}

fn lint_paths(ctx: &PresetContext, names: &[&str]) -> PresetPaths {
    PresetPaths {
        ro: names.iter().map(|name| ctx.work_dir.join(name)).collect(),
        ..Default::default()
    }
}

fn resolve_lint_ts(ctx: &PresetContext, _disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    Ok(lint_paths(
        ctx,
        &[
            ".editorconfig",
            ".eslintrc",
            ".eslintrc.json",
            ".eslintrc.js",
            ".eslintrc.cjs",
            ".prettierrc",
            ".prettierrc.json",
            ".prettierignore",
            "eslint.config.js",
            "eslint.config.mjs",
            "eslint.config.cjs",
            "tsconfig.json",
            "biome.json",
            "biome.jsonc",
        ],
    ))
}

fn resolve_lint_go(ctx: &PresetContext, _disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    Ok(lint_paths(
        ctx,
        &[
            ".editorconfig",
            ".golangci.yml",
            ".golangci.yaml",
            ".golangci.toml",
            ".golangci.json",
        ],
    ))
}

fn resolve_lint_python(ctx: &PresetContext, _disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    Ok(lint_paths(
        ctx,
        &[
            ".editorconfig",
            ".flake8",
            ".pylintrc",
            "pyproject.toml",
            "setup.cfg",
            "tox.ini",
            ".ruff.toml",
            "ruff.toml",
            "mypy.ini",
            ".isort.cfg",
        ],
    ))
}

fn resolve_lint_all(ctx: &PresetContext, disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    let members: [(&str, Resolver); 3] = [
        (PRESET_LINT_TS, resolve_lint_ts),
        (PRESET_LINT_GO, resolve_lint_go),
        (PRESET_LINT_PYTHON, resolve_lint_python),
    ];

    let mut paths = PresetPaths::default();
    for (name, resolve) in members {
        if disabled.contains(name) {
            continue;
        }
        paths.extend(resolve(ctx, disabled)?);
    }
    Ok(paths)
}

fn resolve_all(ctx: &PresetContext, disabled: &BTreeSet<String>) -> Result<PresetPaths> {
    let members: [(&str, Resolver); 4] = [
        (PRESET_BASE, resolve_base),
        (PRESET_CACHES, resolve_caches),
        (PRESET_GIT, resolve_git),
        (PRESET_LINT_ALL, resolve_lint_all),
    ];

    let mut paths = PresetPaths::default();
    for (name, resolve) in members {
        if disabled.contains(name) {
            continue;
        }
        paths.extend(resolve(ctx, disabled)?);
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ctx() -> PresetContext {
        PresetContext {
            home_dir: PathBuf::from("/home/u"),
            work_dir: PathBuf::from("/work"),
            loaded_config_paths: vec![PathBuf::from("/home/u/.config/agent-sandbox/config.json")],
        }
    }

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn base_pins_secrets_and_config() {
        let paths = expand_presets(&tokens(&["@base"]), &ctx()).expect("expand");
        assert!(paths.rw.contains(&PathBuf::from("/work")));
        assert!(paths.rw.contains(&PathBuf::from("/tmp")));
        assert!(paths.ro.contains(&PathBuf::from("/home/u")));
        assert!(
            paths
                .ro
                .contains(&PathBuf::from("/home/u/.config/agent-sandbox/config.json"))
        );
        assert!(paths.exclude.contains(&PathBuf::from("/home/u/.ssh")));
        assert!(paths.exclude.contains(&PathBuf::from("/home/u/.gnupg")));
        assert!(paths.exclude.contains(&PathBuf::from("/home/u/.aws")));
    }

    #[test]
    fn empty_token_list_expands_all() {
        let everything = expand_presets(&[], &ctx()).expect("expand");
        let all = expand_presets(&tokens(&["@all"]), &ctx()).expect("expand");
        assert_eq!(everything, all);
    }

    #[test]
    fn disable_then_enable_reenables() {
        let toggled =
            expand_presets(&tokens(&["!@caches", "@caches"]), &ctx()).expect("expand");
        let plain = expand_presets(&tokens(&["@caches"]), &ctx()).expect("expand");
        assert_eq!(toggled, plain);
    }

    #[test]
    fn negated_member_is_skipped_by_composites() {
        let paths =
            expand_presets(&tokens(&["@all", "!@caches"]), &ctx()).expect("expand");
        assert!(!paths.rw.contains(&PathBuf::from("/home/u/.cache")));
        assert!(paths.rw.contains(&PathBuf::from("/work")));
    }

    #[test]
    fn negating_lint_all_then_enabling_one_member() {
        let paths = expand_presets(
            &tokens(&["@all", "!@lint/all", "@lint/python"]),
            &ctx(),
        )
        .expect("expand");
        assert!(paths.ro.contains(&PathBuf::from("/work/pyproject.toml")));
        assert!(!paths.ro.contains(&PathBuf::from("/work/tsconfig.json")));
        // Non-lint members of @all survive.
        assert!(paths.rw.contains(&PathBuf::from("/work")));
    }

    #[test]
    fn negation_only_tokens_subtract_from_the_implicit_all() {
        let paths = expand_presets(&tokens(&["!@git"]), &ctx()).expect("expand");
        let all = expand_presets(&[], &ctx()).expect("expand");
        // Everything @all grants except the git paths.
        assert_eq!(paths.rw, all.rw);
        assert!(paths.ro.contains(&PathBuf::from("/home/u")));
    }

    #[test]
    fn negating_all_alone_yields_nothing() {
        let paths = expand_presets(&tokens(&["!@all"]), &ctx()).expect("expand");
        assert_eq!(paths, PresetPaths::default());
    }

    #[test]
    fn negating_all_then_enabling_base_yields_base_only() {
        let paths = expand_presets(&tokens(&["!@all", "@base"]), &ctx()).expect("expand");
        let base = expand_presets(&tokens(&["@base"]), &ctx()).expect("expand");
        assert_eq!(paths, base);
    }

    #[test]
    fn unknown_preset_lists_available_names() {
        let err = expand_presets(&tokens(&["@nope"]), &ctx()).expect_err("must fail");
        let message = err.to_string();
        assert!(message.contains("@nope"), "{message}");
        assert!(message.contains("@all"), "{message}");
        assert!(message.contains("@lint/python"), "{message}");
    }

    #[test]
    fn unknown_negated_preset_is_also_rejected() {
        let err = expand_presets(&tokens(&["!@nope"]), &ctx()).expect_err("must fail");
        assert!(matches!(err, SandboxErr::UnknownPreset { .. }));
    }

    #[test]
    fn order_of_simple_tokens_does_not_matter() {
        let forward = expand_presets(&tokens(&["@base", "@caches"]), &ctx()).expect("expand");
        let reverse = expand_presets(&tokens(&["@caches", "@base"]), &ctx()).expect("expand");
        let mut forward_ro = forward.ro.clone();
        let mut reverse_ro = reverse.ro.clone();
        forward_ro.sort();
        reverse_ro.sort();
        assert_eq!(forward_ro, reverse_ro);
        let mut forward_rw = forward.rw;
        let mut reverse_rw = reverse.rw;
        forward_rw.sort();
        reverse_rw.sort();
        assert_eq!(forward_rw, reverse_rw);
    }

    #[test]
    fn duplicate_enable_mentions_resolve_once() {
        let twice = expand_presets(&tokens(&["@caches", "@caches"]), &ctx()).expect("expand");
        let once = expand_presets(&tokens(&["@caches"]), &ctx()).expect("expand");
        assert_eq!(twice, once);
    }

    #[test]
    fn git_preset_is_empty_outside_a_repo() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = PresetContext {
            home_dir: PathBuf::from("/home/u"),
            work_dir: dir.path().to_path_buf(),
            loaded_config_paths: Vec::new(),
        };
        let paths = expand_presets(&tokens(&["@git"]), &ctx).expect("expand");
        assert_eq!(paths, PresetPaths::default());
    }
}
