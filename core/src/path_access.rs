//! The path-access model: three access levels, per-rule provenance, and the
//! specificity resolution that turns overlapping preset/config/CLI rules into
//! one deterministic mount order.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::path_utils::absolutize;
use crate::path_utils::expand_tilde;
use crate::path_utils::realpath_best_effort;
use crate::presets::PresetContext;
use crate::presets::PresetPaths;

/// What a path rule grants inside the sandbox.
///
/// The derived order is the specificity order used to break same-path
/// conflicts: `exclude > ro > rw`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Reads and writes permitted.
    Rw,
    /// Visible, reads permitted, writes denied.
    Ro,
    /// Not visible inside the sandbox at all.
    Exclude,
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessLevel::Rw => "rw",
            AccessLevel::Ro => "ro",
            AccessLevel::Exclude => "exclude",
        };
        f.write_str(name)
    }
}

/// Which layer contributed a rule. The derived order is the precedence order:
/// CLI overrides project overrides global overrides preset overrides default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleSource {
    Default,
    Preset,
    Global,
    Project,
    Cli,
}

impl std::fmt::Display for RuleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RuleSource::Default => "default",
            RuleSource::Preset => "preset",
            RuleSource::Global => "global",
            RuleSource::Project => "project",
            RuleSource::Cli => "cli",
        };
        f.write_str(name)
    }
}

/// One `ro`/`rw`/`exclude` entry from a config layer, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemRule {
    pub pattern: String,
    pub access: AccessLevel,
    pub source: RuleSource,
}

/// The effective access decision for one absolute path.
///
/// Non-existent paths are retained: excluding a path the user command may
/// create later is still meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub original_pattern: String,
    pub absolute_path: PathBuf,
    pub access: AccessLevel,
    pub source: RuleSource,
}

/// Merge preset output with the per-layer filesystem rules into one decision
/// per absolute path, ordered parents-before-children.
///
/// Same-path conflicts are resolved by access specificity
/// (`exclude > ro > rw`), then by layer precedence. Parent/child overlaps are
/// left in place: the output order guarantees the child's mount is emitted
/// after (and therefore over) its ancestor's, which is what makes `@base`'s
/// read-only home coexist with `@caches`' writable `~/.cache`.
pub fn resolve_paths(
    preset_paths: &PresetPaths,
    rules: &[FilesystemRule],
    ctx: &PresetContext,
) -> Vec<ResolvedPath> {
    let mut candidates: Vec<ResolvedPath> = Vec::new();

    for (paths, access) in [
        (&preset_paths.rw, AccessLevel::Rw),
        (&preset_paths.ro, AccessLevel::Ro),
        (&preset_paths.exclude, AccessLevel::Exclude),
    ] {
        for path in paths {
            candidates.push(ResolvedPath {
                original_pattern: path.display().to_string(),
                absolute_path: realpath_best_effort(path),
                access,
                source: RuleSource::Preset,
            });
        }
    }

    for rule in rules {
        let expanded = expand_tilde(&rule.pattern, &ctx.home_dir);
        let absolute = absolutize(&expanded, &ctx.work_dir);
        candidates.push(ResolvedPath {
            original_pattern: rule.pattern.clone(),
            absolute_path: realpath_best_effort(&absolute),
            access: rule.access,
            source: rule.source,
        });
    }

    let mut by_path: BTreeMap<PathBuf, ResolvedPath> = BTreeMap::new();
    for candidate in candidates {
        let wins = match by_path.get(&candidate.absolute_path) {
            Some(current) => wins_over(&candidate, current),
            None => true,
        };
        if wins {
            by_path.insert(candidate.absolute_path.clone(), candidate);
        }
    }

    let mut resolved: Vec<ResolvedPath> = by_path.into_values().collect();
    resolved.sort_by(|a, b| {
        depth(&a.absolute_path)
            .cmp(&depth(&b.absolute_path))
            .then_with(|| a.absolute_path.cmp(&b.absolute_path))
    });
    resolved
}

fn wins_over(candidate: &ResolvedPath, current: &ResolvedPath) -> bool {
    (candidate.access, candidate.source) > (current.access, current.source)
}

fn depth(path: &Path) -> usize {
    path.components().count()
}
