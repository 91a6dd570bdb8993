//! Names shared between the host-side launcher and the in-sandbox wrapper
//! dispatcher: the runtime-root layout and the environment variables written
//! into wrapped children.

/// Basename the CLI answers to. Any other argv[0] enters multicall mode.
pub const TOOL_NAME: &str = "agent-sandbox";

/// Fixed absolute directory inside the sandbox holding the tool, the real
/// wrapped binaries, and the wrapper descriptors.
pub const RUNTIME_ROOT: &str = "/run/agent-sandbox";

/// Subdirectory of the primary runtime root where a nested invocation finds
/// the outer sandbox's runtime.
pub const OUTER_DIR: &str = "outer";

/// Canonical descriptor directory. Written by the wrapper generator.
pub const WRAPPERS_DIR: &str = "wrappers";

/// Legacy descriptor directory name. Accepted on read, never emitted.
pub const LEGACY_WRAPPERS_DIR: &str = "policies";

/// Directory of real wrapped binaries inside the runtime root.
pub const BIN_DIR: &str = "bin";

pub const ENV_CMD: &str = "AGENT_SANDBOX_CMD";
pub const ENV_REAL: &str = "AGENT_SANDBOX_REAL";

/// Exit code for operations denied by a command preset.
pub const BLOCKED_EXIT_CODE: i32 = 2;

/// Per-command variant of [`ENV_REAL`] set for custom-script wrappers, e.g.
/// `AGENT_SANDBOX_GIT` for `git`.
pub fn env_var_for_cmd(cmd: &str) -> String {
    let mut var = String::with_capacity(ENV_CMD.len() + cmd.len());
    var.push_str("AGENT_SANDBOX_");
    for ch in cmd.chars() {
        if ch.is_ascii_alphanumeric() {
            var.push(ch.to_ascii_uppercase());
        } else {
            var.push('_');
        }
    }
    var
}
