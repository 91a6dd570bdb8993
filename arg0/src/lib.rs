//! argv[0] dispatch for the multicall binary.
//!
//! The same executable serves as the CLI and as every wrapped command's
//! entry point: a trampoline bind-mounted over `/usr/bin/git` invokes it with
//! argv[0] = `git`. The decision between the two modes must happen before
//! any flag parsing, so this is the first thing `main` runs.

use std::ffi::OsString;
use std::future::Future;
use std::path::Path;

use agent_sandbox_core::runtime::TOOL_NAME;

const TOKIO_WORKER_STACK_SIZE_BYTES: usize = 16 * 1024 * 1024;

/// Route on argv[0], then run the real async entry point.
///
/// When the executable was invoked through a wrapped command's name this
/// hands off to the in-sandbox dispatcher, which never returns. Otherwise it
/// builds the tokio runtime and executes `main_fn`.
pub fn arg0_dispatch_or_else<F, Fut>(main_fn: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut args = std::env::args_os();
    let argv0 = args.next().unwrap_or_default();

    if let Some(cmd_name) = multicall_command(&argv0) {
        // Safety: [`run_main`] never returns.
        let cmd_args: Vec<String> = args
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        agent_sandbox_wrap::run_main(&cmd_name, cmd_args);
    }

    let runtime = build_runtime()?;
    runtime.block_on(main_fn())
}

/// The wrapped-command name carried by argv[0], or `None` for a normal CLI
/// invocation.
fn multicall_command(argv0: &OsString) -> Option<String> {
    let exe_name = Path::new(argv0)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    if exe_name.is_empty() || exe_name == TOOL_NAME {
        None
    } else {
        Some(exe_name.to_string())
    }
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    builder.thread_stack_size(TOKIO_WORKER_STACK_SIZE_BYTES);
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::multicall_command;
    use pretty_assertions::assert_eq;
    use std::ffi::OsString;

    #[test]
    fn own_name_is_a_normal_invocation() {
        assert_eq!(
            multicall_command(&OsString::from("/usr/local/bin/agent-sandbox")),
            None
        );
        assert_eq!(multicall_command(&OsString::from("agent-sandbox")), None);
    }

    #[test]
    fn other_basenames_enter_multicall_mode() {
        assert_eq!(
            multicall_command(&OsString::from("/usr/bin/git")),
            Some("git".to_string())
        );
        assert_eq!(
            multicall_command(&OsString::from("git-receive-pack")),
            Some("git-receive-pack".to_string())
        );
    }

    #[test]
    fn empty_argv0_falls_back_to_the_cli() {
        assert_eq!(multicall_command(&OsString::new()), None);
    }
}
