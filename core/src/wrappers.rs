//! Host-side generation of the wrapper artifacts: one shared deny script, a
//! trampoline per wrapped command, and the descriptor files the in-sandbox
//! dispatcher routes on. Everything is staged in a temp directory owned by
//! [`WrapperSetup`]; dropping the setup removes the directory on every exit
//! path, including panics.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;
use tracing::debug;

use crate::binary_locator::binary_locations;
use crate::config::CommandRule;
use crate::error::Result;
use crate::error::SandboxErr;
use crate::runtime::BIN_DIR;
use crate::runtime::RUNTIME_ROOT;
use crate::runtime::TOOL_NAME;
use crate::runtime::WRAPPERS_DIR;

const DENY_SCRIPT_NAME: &str = "deny-binary";

/// One bind mount shadowing a PATH location of a wrapped command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperMount {
    pub source_on_host: PathBuf,
    pub destination_in_sandbox: PathBuf,
}

/// Runtime-root payload for one wrapped command: the real binary to expose
/// under `bin/` (absent for block-only wrappers) and the descriptor to expose
/// under `wrappers/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperRuntimeEntry {
    pub name: String,
    pub real_binary: Option<PathBuf>,
    pub descriptor_on_host: PathBuf,
}

#[derive(Debug)]
pub struct WrapperSetup {
    temp_dir: TempDir,
    pub mounts: Vec<WrapperMount>,
    pub runtime_entries: Vec<WrapperRuntimeEntry>,
}

impl WrapperSetup {
    pub fn staging_dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

/// Generate wrapper artifacts for every command rule.
///
/// Commands whose binary is nowhere on PATH are skipped silently: there is
/// nothing to shadow. `ExplicitAllow` rules produce no artifacts at all.
pub fn generate_wrappers(
    commands: &BTreeMap<String, CommandRule>,
    path_env: Option<&str>,
) -> Result<WrapperSetup> {
    let temp_dir = tempfile::Builder::new()
        .prefix("agent-sandbox-")
        .tempdir()?;
    let staging = temp_dir.path();

    let mut mounts = Vec::new();
    let mut runtime_entries = Vec::new();
    let mut deny_script: Option<PathBuf> = None;

    for (name, rule) in commands {
        if matches!(rule, CommandRule::ExplicitAllow) {
            continue;
        }

        let locations = binary_locations(name, path_env);
        if locations.is_empty() {
            debug!("skipping wrapper for {name}: not found on PATH");
            continue;
        }

        let source = match rule {
            CommandRule::ExplicitAllow => unreachable!("filtered above"),
            CommandRule::Block => match deny_script.clone() {
                Some(script) => script,
                None => {
                    let script = write_deny_script(staging)?;
                    deny_script = Some(script.clone());
                    script
                }
            },
            CommandRule::Preset(preset) => {
                let policy = preset.strip_prefix('@').unwrap_or(preset.as_str());
                let trampoline = write_trampoline(
                    staging,
                    name,
                    &format!("--preset {}", quote(preset)),
                )?;
                runtime_entries.push(WrapperRuntimeEntry {
                    name: name.clone(),
                    real_binary: Some(locations[0].resolved.clone()),
                    descriptor_on_host: write_descriptor(
                        staging,
                        name,
                        &format!("preset:{policy}\n"),
                    )?,
                });
                trampoline
            }
            CommandRule::Script(script) => {
                let trampoline = write_trampoline(
                    staging,
                    name,
                    &format!("--script {}", quote(&script.to_string_lossy())),
                )?;
                runtime_entries.push(WrapperRuntimeEntry {
                    name: name.clone(),
                    real_binary: Some(locations[0].resolved.clone()),
                    // The user script itself is the descriptor: the
                    // dispatcher execs whatever `wrappers/<cmd>` holds.
                    descriptor_on_host: script.clone(),
                });
                trampoline
            }
        };

        for location in &locations {
            mounts.push(WrapperMount {
                source_on_host: source.clone(),
                destination_in_sandbox: location.path.clone(),
            });
        }
    }

    Ok(WrapperSetup {
        temp_dir,
        mounts,
        runtime_entries,
    })
}

/// A single script serves every blocked command: `$0` is the shadowed
/// location, so its basename names the command in the message.
fn write_deny_script(staging: &Path) -> Result<PathBuf> {
    let path = staging.join(DENY_SCRIPT_NAME);
    write_executable(
        &path,
        "#!/bin/sh\necho \"command '$(basename \"$0\")' is blocked in this sandbox\" >&2\nexit 1\n",
    )?;
    Ok(path)
}

fn write_trampoline(staging: &Path, name: &str, mode_args: &str) -> Result<PathBuf> {
    let path = staging.join(format!("wrap-{name}"));
    let self_in_sandbox = format!("{RUNTIME_ROOT}/{TOOL_NAME}");
    write_executable(
        &path,
        &format!(
            "#!/bin/sh\nexec {} wrap-binary {mode_args} {} \"$@\"\n",
            quote(&self_in_sandbox),
            quote(name),
        ),
    )?;
    Ok(path)
}

fn write_descriptor(staging: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = staging.join(format!("wrapper-{name}"));
    fs::write(&path, content)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
    Ok(path)
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

fn quote(value: &str) -> String {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Destinations inside the runtime root for one entry.
pub fn runtime_bin_path(name: &str) -> PathBuf {
    PathBuf::from(RUNTIME_ROOT).join(BIN_DIR).join(name)
}

pub fn runtime_wrapper_path(name: &str) -> PathBuf {
    PathBuf::from(RUNTIME_ROOT).join(WRAPPERS_DIR).join(name)
}

/// Mounts must reference live, executable sources; surface a precise error
/// instead of letting the executor fail opaquely.
pub fn ensure_mount_sources_exist(setup: &WrapperSetup) -> Result<()> {
    for mount in &setup.mounts {
        let metadata = fs::metadata(&mount.source_on_host).map_err(|err| {
            SandboxErr::Execution(format!(
                "wrapper source {} vanished: {err}",
                mount.source_on_host.display()
            ))
        })?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(SandboxErr::Execution(format!(
                "wrapper source {} is not executable",
                mount.source_on_host.display()
            )));
        }
    }
    Ok(())
}
