//! The in-sandbox side of command wrapping: when the tool is re-entered
//! through a shadowed binary (multicall, via argv[0]) or through the hidden
//! `wrap-binary` subcommand, this crate finds the sandbox runtime root, reads
//! the wrapper descriptor for the command, enforces the policy, and execs
//! either the real binary or the user's wrapper script.

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use agent_sandbox_core::SandboxErr;
use agent_sandbox_core::runtime::BIN_DIR;
use agent_sandbox_core::runtime::BLOCKED_EXIT_CODE;
use agent_sandbox_core::runtime::ENV_CMD;
use agent_sandbox_core::runtime::ENV_REAL;
use agent_sandbox_core::runtime::LEGACY_WRAPPERS_DIR;
use agent_sandbox_core::runtime::OUTER_DIR;
use agent_sandbox_core::runtime::RUNTIME_ROOT;
use agent_sandbox_core::runtime::WRAPPERS_DIR;
use agent_sandbox_core::runtime::env_var_for_cmd;
use agent_sandbox_git_policy::PolicyViolation;
use agent_sandbox_git_policy::check_invocation;
use tracing::debug;

const DESCRIPTOR_PRESET_PREFIX: &str = "preset:";
const GIT_PLUMBING_ALIASES: &[&str] = &["git-receive-pack", "git-upload-pack"];

#[derive(Debug)]
pub enum WrapError {
    Policy(PolicyViolation),
    Sandbox(SandboxErr),
}

impl std::fmt::Display for WrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WrapError::Policy(violation) => violation.fmt(f),
            WrapError::Sandbox(err) => err.fmt(f),
        }
    }
}

impl From<PolicyViolation> for WrapError {
    fn from(violation: PolicyViolation) -> Self {
        WrapError::Policy(violation)
    }
}

impl From<SandboxErr> for WrapError {
    fn from(err: SandboxErr) -> Self {
        WrapError::Sandbox(err)
    }
}

impl From<std::io::Error> for WrapError {
    fn from(err: std::io::Error) -> Self {
        WrapError::Sandbox(err.into())
    }
}

impl WrapError {
    pub fn exit_code(&self) -> i32 {
        match self {
            WrapError::Policy(_) => BLOCKED_EXIT_CODE,
            WrapError::Sandbox(_) => 1,
        }
    }
}

/// The wrapper mode selected by the trampoline scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapperMode {
    Preset(String),
    Script(PathBuf),
}

/// Where a wrapped command should be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dispatch {
    /// Built-in git policy, then exec `<root>/bin/git` with `args`.
    GitPreset { root: PathBuf, args: Vec<String> },
    /// Exec the descriptor (or user script) with the wrapper env set.
    UserScript {
        root: PathBuf,
        script: PathBuf,
        cmd: String,
        args: Vec<String>,
    },
}

/// Multicall entry: invoked when argv[0]'s basename is a wrapped command.
/// Never returns; on success the process is replaced by the target.
pub fn run_main(cmd_name: &str, args: Vec<String>) -> ! {
    let err = match dispatch_multicall(Path::new(RUNTIME_ROOT), cmd_name, args) {
        Ok(dispatch) => execute(dispatch),
        Err(err) => err,
    };
    eprintln!("agent-sandbox: {err}");
    std::process::exit(err.exit_code());
}

/// `wrap-binary` subcommand entry, used by the generated trampolines.
/// Returns only on failure; the caller maps the error to an exit code.
pub fn run_wrap_binary(mode: WrapperMode, cmd: &str, args: Vec<String>) -> WrapError {
    match dispatch_wrap_binary(Path::new(RUNTIME_ROOT), mode, cmd, args) {
        Ok(dispatch) => execute(dispatch),
        Err(err) => err,
    }
}

/// Existing runtime roots in search order: the primary root first, then the
/// outer sandbox's runtime in the nested case.
fn discover_roots(primary: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if primary.is_dir() {
        roots.push(primary.to_path_buf());
        let outer = primary.join(OUTER_DIR);
        if outer.is_dir() {
            roots.push(outer);
        }
    }
    roots
}

/// Locate the wrapper descriptor for `cmd` under one root. The legacy
/// `policies/` directory is accepted on read.
fn descriptor_path(root: &Path, cmd: &str) -> Option<PathBuf> {
    for dir in [WRAPPERS_DIR, LEGACY_WRAPPERS_DIR] {
        let candidate = root.join(dir).join(cmd);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn dispatch_multicall(
    primary: &Path,
    cmd_name: &str,
    args: Vec<String>,
) -> Result<Dispatch, WrapError> {
    let roots = discover_roots(primary);
    if roots.is_empty() {
        return Err(SandboxErr::NotInSandbox.into());
    }

    for root in &roots {
        if let Some(descriptor) = descriptor_path(root, cmd_name) {
            return route(root, &descriptor, cmd_name, args);
        }
    }

    // git's plumbing symlinks re-enter the git wrapper with the subcommand
    // prepended, preserving the argv shape git expects.
    if GIT_PLUMBING_ALIASES.contains(&cmd_name) {
        let subcommand = cmd_name.trim_start_matches("git-");
        for root in &roots {
            if let Some(descriptor) = descriptor_path(root, "git") {
                let mut rewritten = Vec::with_capacity(args.len() + 1);
                rewritten.push(subcommand.to_string());
                rewritten.extend(args);
                debug!("aliasing {cmd_name} to the git wrapper");
                return route(root, &descriptor, "git", rewritten);
            }
        }
    }

    Err(SandboxErr::BinaryNotFound(cmd_name.to_string()).into())
}

fn dispatch_wrap_binary(
    primary: &Path,
    mode: WrapperMode,
    cmd: &str,
    args: Vec<String>,
) -> Result<Dispatch, WrapError> {
    let roots = discover_roots(primary);
    let Some(root) = roots.first() else {
        return Err(SandboxErr::NotInSandbox.into());
    };

    match mode {
        WrapperMode::Preset(preset) => {
            let name = preset.strip_prefix('@').unwrap_or(preset.as_str());
            if name != "git" || cmd != "git" {
                return Err(SandboxErr::BinaryNotFound(cmd.to_string()).into());
            }
            Ok(Dispatch::GitPreset {
                root: root.clone(),
                args,
            })
        }
        WrapperMode::Script(script) => {
            // Prefer the path as given; fall back to the descriptor mount if
            // the host path is not visible inside the sandbox.
            let script = if script.is_file() {
                script
            } else {
                descriptor_path(root, cmd)
                    .ok_or_else(|| SandboxErr::BinaryNotFound(cmd.to_string()))?
            };
            Ok(Dispatch::UserScript {
                root: root.clone(),
                script,
                cmd: cmd.to_string(),
                args,
            })
        }
    }
}

fn route(
    root: &Path,
    descriptor: &Path,
    cmd: &str,
    args: Vec<String>,
) -> Result<Dispatch, WrapError> {
    let content = fs::read_to_string(descriptor)?;
    if let Some(preset) = content.strip_prefix(DESCRIPTOR_PRESET_PREFIX) {
        let preset = preset.trim_end();
        if preset == "git" {
            return Ok(Dispatch::GitPreset {
                root: root.to_path_buf(),
                args,
            });
        }
        return Err(SandboxErr::BinaryNotFound(cmd.to_string()).into());
    }
    Ok(Dispatch::UserScript {
        root: root.to_path_buf(),
        script: descriptor.to_path_buf(),
        cmd: cmd.to_string(),
        args,
    })
}

/// Carry out a dispatch decision. Returns only on failure; on success the
/// process image is replaced.
fn execute(dispatch: Dispatch) -> WrapError {
    match dispatch {
        Dispatch::GitPreset { root, args } => exec_git_preset(&root, &args),
        Dispatch::UserScript {
            root,
            script,
            cmd,
            args,
        } => exec_user_script(&root, &script, &cmd, &args),
    }
}

/// The `preset:git` policy: free rein inside the scratch directory,
/// otherwise alias guard, global-flag analysis, denylist, then exec.
fn exec_git_preset(root: &Path, args: &[String]) -> WrapError {
    if !cwd_is_in_scratch_dir() {
        if let Err(violation) = check_invocation(args) {
            return violation.into();
        }
    }

    let real = root.join(BIN_DIR).join("git");
    if !real.is_file() {
        return SandboxErr::BinaryNotFound("git".to_string()).into();
    }

    let err = Command::new(&real).args(args).exec();
    SandboxErr::Execution(format!("exec {} failed: {err}", real.display())).into()
}

fn exec_user_script(root: &Path, script: &Path, cmd: &str, args: &[String]) -> WrapError {
    let real = root.join(BIN_DIR).join(cmd);
    let real_value = if real.is_file() {
        real.display().to_string()
    } else {
        // Block-only wrapper: the variable is set but empty.
        String::new()
    };

    let err = Command::new(script)
        .args(args)
        .env(ENV_CMD, cmd)
        .env(ENV_REAL, &real_value)
        .env(env_var_for_cmd(cmd), &real_value)
        .exec();
    SandboxErr::Execution(format!("exec {} failed: {err}", script.display())).into()
}

/// Inside the sandbox's canonical scratch directory no git operation is
/// blocked: experiments in `/tmp` cannot damage the workspace.
fn cwd_is_in_scratch_dir() -> bool {
    let tmpdir = std::env::var_os("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    match (std::env::current_dir(), tmpdir.canonicalize()) {
        (Ok(cwd), Ok(scratch)) => is_under(&cwd, &scratch),
        _ => false,
    }
}

fn is_under(cwd: &Path, scratch: &Path) -> bool {
    let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    cwd.starts_with(scratch)
}
