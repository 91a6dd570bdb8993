//! Spawning the external sandbox executor and supervising the child.
//!
//! The caller supplies two cancellation tokens: `cancel` delivers SIGTERM and
//! keeps waiting; `force_kill` escalates to SIGKILL and awaits the exit. A
//! child that dies through either pathway is reported as
//! [`SandboxErr::Cancelled`], never as its raw exit status.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use tokio::process::Child;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::Result;
use crate::error::SandboxErr;

/// The external sandbox executor. Filesystem and namespace enforcement is
/// entirely its job; we only build its argument vector.
pub const SANDBOX_EXECUTOR: &str = "bwrap";

pub struct ExecuteSandboxRequest {
    pub executor_args: Vec<String>,
    pub command: Vec<String>,
    pub env: HashMap<String, String>,
    pub cancel: CancellationToken,
    pub force_kill: CancellationToken,
}

/// Run `command` under the executor and return its exit code.
pub async fn execute_sandbox(request: ExecuteSandboxRequest) -> Result<i32> {
    let ExecuteSandboxRequest {
        executor_args,
        command,
        env,
        cancel,
        force_kill,
    } = request;

    let mut cmd = Command::new(SANDBOX_EXECUTOR);
    cmd.args(&executor_args);
    cmd.arg("--");
    cmd.args(&command);
    cmd.env_clear();
    cmd.envs(&env);
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    // If the launcher dies, take the sandboxed child down with it.
    cmd.kill_on_drop(true);

    debug!(
        "spawning {SANDBOX_EXECUTOR} with {} args",
        executor_args.len()
    );
    let child = cmd
        .spawn()
        .map_err(|err| SandboxErr::Execution(err.to_string()))?;

    supervise(child, cancel, force_kill).await
}

/// Wait for the child while honoring the two-stage kill escalation.
async fn supervise(
    mut child: Child,
    cancel: CancellationToken,
    force_kill: CancellationToken,
) -> Result<i32> {
    let mut term_sent = false;
    let mut kill_sent = false;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if term_sent || kill_sent {
                    return Err(SandboxErr::Cancelled);
                }
                return match status.code() {
                    Some(code) => Ok(code),
                    None => Err(SandboxErr::Signal(status.signal().unwrap_or(0))),
                };
            }
            _ = cancel.cancelled(), if !term_sent => {
                term_sent = true;
                match child.id() {
                    Some(pid) => {
                        debug!("cancellation requested, sending SIGTERM to {pid}");
                        // Safety: plain kill(2) on the child we just spawned.
                        unsafe {
                            libc::kill(pid as libc::pid_t, libc::SIGTERM);
                        }
                    }
                    None => warn!("cancellation requested but child already reaped"),
                }
            }
            _ = force_kill.cancelled(), if !kill_sent => {
                kill_sent = true;
                debug!("force-kill requested, sending SIGKILL");
                if let Err(err) = child.start_kill() {
                    warn!("failed to deliver SIGKILL: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn spawn_sh(script: &str) -> Child {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd.spawn().expect("spawn /bin/sh")
    }

    #[tokio::test]
    async fn exit_code_propagates() {
        let child = spawn_sh("exit 7");
        let code = supervise(child, CancellationToken::new(), CancellationToken::new())
            .await
            .expect("supervise");
        assert_eq!(code, 7);
    }

    #[tokio::test]
    async fn cancellation_terminates_and_reports_cancelled() {
        let child = spawn_sh("sleep 30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = supervise(child, cancel, CancellationToken::new())
            .await
            .expect_err("must cancel");
        assert!(matches!(err, SandboxErr::Cancelled));
    }

    #[tokio::test]
    async fn force_kill_escalates_past_a_term_trap() {
        // A child that ignores SIGTERM only dies through the SIGKILL pathway.
        let child = spawn_sh("trap '' TERM; sleep 30");
        let cancel = CancellationToken::new();
        let force_kill = CancellationToken::new();
        let trigger_cancel = cancel.clone();
        let trigger_force = force_kill.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger_cancel.cancel();
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger_force.cancel();
        });
        let err = supervise(child, cancel, force_kill)
            .await
            .expect_err("must cancel");
        assert!(matches!(err, SandboxErr::Cancelled));
    }

    #[tokio::test]
    async fn external_signal_death_is_reported_distinctly() {
        let child = spawn_sh("kill -KILL $$");
        let err = supervise(child, CancellationToken::new(), CancellationToken::new())
            .await
            .expect_err("must report signal");
        assert!(matches!(err, SandboxErr::Signal(signal) if signal == libc::SIGKILL));
    }
}
