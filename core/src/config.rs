//! Layered configuration: built-in defaults, the user-global file, the
//! project (or `--config`) file, and CLI overrides, merged with explicit
//! precedence. Files are strict JSON with comments (`.json` and `.jsonc` are
//! parsed identically); unknown fields are rejected at every level.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde::de;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::path_access::AccessLevel;
use crate::path_access::FilesystemRule;
use crate::path_access::RuleSource;
use crate::presets::PRESET_GIT;

pub const PROJECT_CONFIG_BASENAME: &str = ".agent-sandbox";
pub const GLOBAL_CONFIG_DIR: &str = "agent-sandbox";
pub const GLOBAL_CONFIG_BASENAME: &str = "config";

/// How a wrapped command is handled inside the sandbox.
///
/// The JSON form is overloaded (`true`, `false`, `"@preset"`,
/// `"/path/to/exe"`), so decoding is a two-step try: boolean first, then
/// string. `null` and anything else are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRule {
    /// Run the real binary; overrides a lower-layer block.
    ExplicitAllow,
    /// Replace the binary with the deny script at every PATH location.
    Block,
    /// Use the built-in wrapper, e.g. `"@git"`.
    Preset(String),
    /// Trampoline to a user-supplied host script.
    Script(PathBuf),
}

impl CommandRule {
    fn from_string_value(value: &str) -> Self {
        if value.starts_with('@') {
            CommandRule::Preset(value.to_string())
        } else {
            CommandRule::Script(PathBuf::from(value))
        }
    }
}

impl<'de> Deserialize<'de> for CommandRule {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RuleVisitor;

        impl de::Visitor<'_> for RuleVisitor {
            type Value = CommandRule;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("true, false, \"@preset\" or \"/path/to/script\"")
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<CommandRule, E> {
                Ok(if value {
                    CommandRule::ExplicitAllow
                } else {
                    CommandRule::Block
                })
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<CommandRule, E> {
                Ok(CommandRule::from_string_value(value))
            }
        }

        deserializer.deserialize_any(RuleVisitor)
    }
}

impl Serialize for CommandRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CommandRule::ExplicitAllow => serializer.serialize_bool(true),
            CommandRule::Block => serializer.serialize_bool(false),
            CommandRule::Preset(name) => serializer.serialize_str(name),
            CommandRule::Script(path) => serializer.serialize_str(&path.to_string_lossy()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ro: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rw: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// One configuration file, before merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<bool>,
    #[serde(default, skip_serializing_if = "is_default_filesystem")]
    pub filesystem: FilesystemFile,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub commands: BTreeMap<String, CommandRule>,
}

fn is_default_filesystem(filesystem: &FilesystemFile) -> bool {
    *filesystem == FilesystemFile::default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigLayer {
    Global,
    Project,
    Explicit,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigLayer::Global => "global",
            ConfigLayer::Project => "project",
            ConfigLayer::Explicit => "explicit",
        };
        f.write_str(name)
    }
}

/// The CLI layer, filled from parsed flags by the binary.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub network: Option<bool>,
    pub docker: Option<bool>,
    pub ro: Vec<String>,
    pub rw: Vec<String>,
    pub exclude: Vec<String>,
    /// Raw `--cmd KEY=VALUE[,KEY=VALUE...]` arguments.
    pub cmd: Vec<String>,
}

/// The merged view of every layer.
#[derive(Debug, Clone)]
pub struct Config {
    pub network: bool,
    pub docker: bool,
    /// Preset tokens concatenated in layer order (base first).
    pub presets: Vec<String>,
    /// `ro`/`rw`/`exclude` entries from every layer, in layer order, each
    /// labeled with its origin for diagnostics.
    pub filesystem: Vec<FilesystemRule>,
    /// Command rules, last writer wins per key.
    pub commands: BTreeMap<String, CommandRule>,
    pub effective_cwd: PathBuf,
    pub loaded_config_files: Vec<(ConfigLayer, PathBuf)>,
}

impl Config {
    pub fn loaded_config_paths(&self) -> Vec<PathBuf> {
        self.loaded_config_files
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }
}

/// Built-in defaults: network on, docker off, `git` wrapped with `@git`.
pub fn default_config_file() -> ConfigFile {
    ConfigFile {
        network: Some(true),
        docker: Some(false),
        filesystem: FilesystemFile::default(),
        commands: BTreeMap::from([(
            PRESET_GIT.to_string(),
            CommandRule::Preset(format!("@{PRESET_GIT}")),
        )]),
    }
}

/// Load and merge all five layers for `work_dir`.
///
/// `home_dir` and `xdg_config_home` are passed in rather than read from the
/// environment so tests can pin them.
pub fn load_config(
    work_dir: &Path,
    home_dir: &Path,
    xdg_config_home: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<Config> {
    let mut loaded: Vec<(ConfigLayer, PathBuf)> = Vec::new();

    let global_dir = xdg_config_home
        .map(Path::to_path_buf)
        .unwrap_or_else(|| home_dir.join(".config"))
        .join(GLOBAL_CONFIG_DIR);
    let global = match find_config_file(&global_dir, GLOBAL_CONFIG_BASENAME)? {
        Some(path) => {
            let file = parse_config_file(&path)?;
            loaded.push((ConfigLayer::Global, path));
            Some(file)
        }
        None => None,
    };

    // The explicit --config file and the project file are alternatives,
    // never combined.
    let project = match &overrides.config_path {
        Some(path) => {
            let file = parse_config_file(path)?;
            loaded.push((ConfigLayer::Explicit, path.clone()));
            Some(file)
        }
        None => match find_config_file(work_dir, PROJECT_CONFIG_BASENAME)? {
            Some(path) => {
                let file = parse_config_file(&path)?;
                loaded.push((ConfigLayer::Project, path));
                Some(file)
            }
            None => None,
        },
    };

    let defaults = default_config_file();
    let mut network = defaults.network.unwrap_or(true);
    let mut docker = defaults.docker.unwrap_or(false);
    let mut presets: Vec<String> = Vec::new();
    let mut filesystem: Vec<FilesystemRule> = Vec::new();
    let mut commands = defaults.commands;

    let file_layers = [
        (RuleSource::Global, global.as_ref()),
        (RuleSource::Project, project.as_ref()),
    ];
    for (source, file) in file_layers {
        let Some(file) = file else { continue };
        if let Some(value) = file.network {
            network = value;
        }
        if let Some(value) = file.docker {
            docker = value;
        }
        presets.extend(file.filesystem.presets.iter().cloned());
        push_rules(&mut filesystem, &file.filesystem, source);
        for (name, rule) in &file.commands {
            commands.insert(name.clone(), rule.clone());
        }
    }

    if let Some(value) = overrides.network {
        network = value;
    }
    if let Some(value) = overrides.docker {
        docker = value;
    }
    for (patterns, access) in [
        (&overrides.ro, AccessLevel::Ro),
        (&overrides.rw, AccessLevel::Rw),
        (&overrides.exclude, AccessLevel::Exclude),
    ] {
        for pattern in patterns {
            filesystem.push(FilesystemRule {
                pattern: pattern.clone(),
                access,
                source: RuleSource::Cli,
            });
        }
    }
    for (name, rule) in parse_cmd_overrides(&overrides.cmd)? {
        commands.insert(name, rule);
    }

    validate_commands(&commands)?;

    Ok(Config {
        network,
        docker,
        presets,
        filesystem,
        commands,
        effective_cwd: work_dir.to_path_buf(),
        loaded_config_files: loaded,
    })
}

fn push_rules(filesystem: &mut Vec<FilesystemRule>, file: &FilesystemFile, source: RuleSource) {
    for (patterns, access) in [
        (&file.ro, AccessLevel::Ro),
        (&file.rw, AccessLevel::Rw),
        (&file.exclude, AccessLevel::Exclude),
    ] {
        for pattern in patterns {
            filesystem.push(FilesystemRule {
                pattern: pattern.clone(),
                access,
                source,
            });
        }
    }
}

/// Look for `<dir>/<basename>.json` and `<dir>/<basename>.jsonc`. Both
/// existing at once is ambiguous and aborts.
pub fn find_config_file(dir: &Path, basename: &str) -> Result<Option<PathBuf>> {
    let json = dir.join(format!("{basename}.json"));
    let jsonc = dir.join(format!("{basename}.jsonc"));
    match (json.is_file(), jsonc.is_file()) {
        (true, true) => Err(SandboxErr::Config(format!(
            "duplicate config files: both {} and {} exist",
            json.display(),
            jsonc.display()
        ))),
        (true, false) => Ok(Some(json)),
        (false, true) => Ok(Some(jsonc)),
        (false, false) => Ok(None),
    }
}

/// Parse one config file. Comments are allowed in both `.json` and `.jsonc`.
pub fn parse_config_file(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path).map_err(|err| {
        SandboxErr::Config(format!("cannot read {}: {err}", path.display()))
    })?;
    serde_json5::from_str(&contents)
        .map_err(|err| SandboxErr::Config(format!("{}: {err}", path.display())))
}

pub fn parse_config_str(contents: &str) -> Result<ConfigFile> {
    serde_json5::from_str(contents).map_err(|err| SandboxErr::Config(err.to_string()))
}

/// Parse repeatable `--cmd KEY=VALUE[,KEY=VALUE...]` flags. Values accept the
/// same four shapes as the JSON form.
pub fn parse_cmd_overrides(raw: &[String]) -> Result<BTreeMap<String, CommandRule>> {
    let mut rules = BTreeMap::new();
    for flag in raw {
        for pair in flag.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(SandboxErr::Config(format!(
                    "invalid --cmd entry {pair:?}: expected KEY=VALUE"
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(SandboxErr::Config(format!(
                    "invalid --cmd entry {pair:?}: expected KEY=VALUE"
                )));
            }
            let rule = match value {
                "true" => CommandRule::ExplicitAllow,
                "false" => CommandRule::Block,
                other => CommandRule::from_string_value(other),
            };
            rules.insert(key.to_string(), rule);
        }
    }
    Ok(rules)
}

/// A preset rule is only valid on the command it names: `@git` may only be
/// attached to `git`.
fn validate_commands(commands: &BTreeMap<String, CommandRule>) -> Result<()> {
    for (name, rule) in commands {
        if let CommandRule::Preset(preset) = rule {
            let target = preset.strip_prefix('@').unwrap_or(preset.as_str());
            if target != name {
                return Err(SandboxErr::Config(format!(
                    "command {name:?} cannot use preset {preset:?}: preset wrappers apply only to the command they are named after"
                )));
            }
        }
    }
    Ok(())
}
