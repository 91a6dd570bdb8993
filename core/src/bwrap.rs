//! Translation of the resolved sandbox policy into bubblewrap arguments.
//!
//! Mount order carries the semantics:
//! 1. `--ro-bind / /` makes the entire filesystem read-only.
//! 2. Path rules are emitted parents-first, so a child's bind lands on top
//!    of its ancestor's and wins.
//! 3. Excluded paths are masked with `--tmpfs` (directories) or a read-only
//!    `/dev/null` bind (files) so nothing beneath them is reachable.
//! 4. The runtime root (`/run/agent-sandbox`) is populated last: the tool
//!    itself, the real wrapped binaries under `bin/`, the wrapper
//!    descriptors under `wrappers/`, and, when this launch is itself inside
//!    a sandbox, the outer runtime under `outer/`.

use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;
use crate::error::SandboxErr;
use crate::path_access::AccessLevel;
use crate::path_access::ResolvedPath;
use crate::runtime::OUTER_DIR;
use crate::runtime::RUNTIME_ROOT;
use crate::runtime::TOOL_NAME;
use crate::wrappers::WrapperSetup;
use crate::wrappers::runtime_bin_path;
use crate::wrappers::runtime_wrapper_path;

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Everything the argv builder needs besides the resolved path rules.
#[derive(Debug)]
pub struct ExecutorOptions {
    pub network: bool,
    pub docker: bool,
    /// Host path of this executable, exposed at `<runtime-root>/agent-sandbox`.
    pub self_exe: PathBuf,
}

/// Build the bubblewrap argv (everything before the `--` separator and the
/// user command, which [`crate::exec::execute_sandbox`] appends).
pub fn create_executor_args(
    resolved: &[ResolvedPath],
    setup: &WrapperSetup,
    options: &ExecutorOptions,
) -> Result<Vec<String>> {
    if !options.self_exe.is_absolute() {
        return Err(SandboxErr::Execution(format!(
            "self executable path {} is not absolute",
            options.self_exe.display()
        )));
    }

    let mut args = vec![
        "--die-with-parent".to_string(),
        "--new-session".to_string(),
        "--unshare-pid".to_string(),
        "--proc".to_string(),
        "/proc".to_string(),
        "--dev".to_string(),
        "/dev".to_string(),
    ];

    // Read-only root, then selectively re-enable or mask beneath it.
    push3(&mut args, "--ro-bind", "/", "/");

    // The child's TMPDIR is normalized to /tmp; give it a private scratch
    // tmpfs unless a rule shares the host /tmp read-write.
    let tmp = Path::new("/tmp");
    let tmp_is_writable = resolved
        .iter()
        .any(|rule| rule.access == AccessLevel::Rw && rule.absolute_path == tmp);
    if !tmp_is_writable {
        args.push("--tmpfs".to_string());
        args.push("/tmp".to_string());
    }

    for rule in resolved {
        let path = &rule.absolute_path;
        match rule.access {
            AccessLevel::Rw => {
                if path.exists() {
                    push_bind(&mut args, "--bind", path, path);
                }
            }
            AccessLevel::Ro => {
                if path.exists() {
                    push_bind(&mut args, "--ro-bind", path, path);
                }
            }
            AccessLevel::Exclude => {
                if path.is_dir() {
                    args.push("--tmpfs".to_string());
                    args.push(path_str(path));
                } else if path.exists() {
                    push_bind(&mut args, "--ro-bind", Path::new("/dev/null"), path);
                }
                // A non-existent excluded path needs no mask: there is
                // nothing to hide yet, and the diagnostics still list it.
            }
        }
    }

    if !options.network {
        args.push("--unshare-net".to_string());
    }

    if options.docker && Path::new(DOCKER_SOCKET).exists() {
        push3(&mut args, "--bind", DOCKER_SOCKET, DOCKER_SOCKET);
    }

    // Nested case: hand the outer sandbox's runtime through before layering
    // our own files on top of the (fresh) runtime root.
    let runtime_root = Path::new(RUNTIME_ROOT);
    if runtime_root.is_dir() {
        push_bind(
            &mut args,
            "--ro-bind",
            runtime_root,
            &runtime_root.join(OUTER_DIR),
        );
    }

    push_bind(
        &mut args,
        "--ro-bind",
        &options.self_exe,
        &runtime_root.join(TOOL_NAME),
    );

    for entry in &setup.runtime_entries {
        if let Some(real) = &entry.real_binary {
            push_bind(&mut args, "--ro-bind", real, &runtime_bin_path(&entry.name));
        }
        push_bind(
            &mut args,
            "--ro-bind",
            &entry.descriptor_on_host,
            &runtime_wrapper_path(&entry.name),
        );
    }

    for mount in &setup.mounts {
        push_bind(
            &mut args,
            "--ro-bind",
            &mount.source_on_host,
            &mount.destination_in_sandbox,
        );
    }

    Ok(args)
}

fn push3(args: &mut Vec<String>, flag: &str, a: &str, b: &str) {
    args.push(flag.to_string());
    args.push(a.to_string());
    args.push(b.to_string());
}

fn push_bind(args: &mut Vec<String>, flag: &str, source: &Path, dest: &Path) {
    args.push(flag.to_string());
    args.push(path_str(source));
    args.push(path_str(dest));
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_access::RuleSource;
    use crate::wrappers::generate_wrappers;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn empty_setup() -> WrapperSetup {
        generate_wrappers(&BTreeMap::new(), None).expect("generate")
    }

    fn rule(path: &Path, access: AccessLevel) -> ResolvedPath {
        ResolvedPath {
            original_pattern: path.display().to_string(),
            absolute_path: path.to_path_buf(),
            access,
            source: RuleSource::Preset,
        }
    }

    fn options() -> ExecutorOptions {
        ExecutorOptions {
            network: true,
            docker: false,
            self_exe: PathBuf::from("/usr/local/bin/agent-sandbox"),
        }
    }

    #[test]
    fn root_is_read_only_before_any_rule() {
        let args =
            create_executor_args(&[], &empty_setup(), &options()).expect("args");
        let root_bind = args
            .windows(3)
            .position(|w| w == ["--ro-bind", "/", "/"])
            .expect("root bind present");
        assert!(args[..root_bind].iter().all(|arg| arg != "--bind"));
    }

    #[test]
    fn rw_rules_bind_writable_in_resolver_order() {
        let work = tempfile::tempdir().expect("tempdir");
        let sub = work.path().join("sub");
        std::fs::create_dir(&sub).expect("mkdir");

        let resolved = [
            rule(work.path(), AccessLevel::Ro),
            rule(&sub, AccessLevel::Rw),
        ];
        let args = create_executor_args(&resolved, &empty_setup(), &options()).expect("args");

        let ro = args
            .iter()
            .position(|arg| *arg == work.path().to_string_lossy())
            .expect("ro bind");
        let rw = args
            .iter()
            .position(|arg| *arg == sub.to_string_lossy())
            .expect("rw bind");
        assert!(ro < rw, "parent must be mounted before child: {args:?}");
    }

    #[test]
    fn excluded_directories_are_masked_with_tmpfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolved = [rule(dir.path(), AccessLevel::Exclude)];
        let args = create_executor_args(&resolved, &empty_setup(), &options()).expect("args");
        let tmpfs = args
            .iter()
            .position(|arg| arg == "--tmpfs")
            .expect("tmpfs present");
        assert_eq!(args[tmpfs + 1], dir.path().to_string_lossy());
    }

    #[test]
    fn excluded_files_are_masked_with_dev_null() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secret = dir.path().join("token");
        std::fs::write(&secret, "s3cret").expect("write");

        let resolved = [rule(&secret, AccessLevel::Exclude)];
        let args = create_executor_args(&resolved, &empty_setup(), &options()).expect("args");
        let mask = args
            .windows(3)
            .any(|w| w[0] == "--ro-bind" && w[1] == "/dev/null" && w[2] == secret.to_string_lossy());
        assert!(mask, "{args:?}");
    }

    #[test]
    fn nonexistent_paths_produce_no_mounts() {
        let resolved = [
            rule(Path::new("/no/such/rw"), AccessLevel::Rw),
            rule(Path::new("/no/such/exclude"), AccessLevel::Exclude),
        ];
        let args = create_executor_args(&resolved, &empty_setup(), &options()).expect("args");
        assert!(args.iter().all(|arg| !arg.contains("/no/such")), "{args:?}");
    }

    #[test]
    fn tmp_gets_a_private_tmpfs_unless_shared_writable() {
        let args = create_executor_args(&[], &empty_setup(), &options()).expect("args");
        assert!(
            args.windows(2)
                .any(|w| w[0] == "--tmpfs" && w[1] == "/tmp"),
            "{args:?}"
        );

        let shared = [rule(Path::new("/tmp"), AccessLevel::Rw)];
        let args = create_executor_args(&shared, &empty_setup(), &options()).expect("args");
        assert!(
            !args.windows(2).any(|w| w[0] == "--tmpfs" && w[1] == "/tmp"),
            "{args:?}"
        );
    }

    #[test]
    fn network_off_unshares_the_namespace() {
        let mut opts = options();
        assert!(
            !create_executor_args(&[], &empty_setup(), &opts)
                .expect("args")
                .contains(&"--unshare-net".to_string())
        );
        opts.network = false;
        assert!(
            create_executor_args(&[], &empty_setup(), &opts)
                .expect("args")
                .contains(&"--unshare-net".to_string())
        );
    }

    #[test]
    fn self_exe_lands_at_the_runtime_root() {
        let args = create_executor_args(&[], &empty_setup(), &options()).expect("args");
        let mount = args.windows(3).any(|w| {
            w[0] == "--ro-bind"
                && w[1] == "/usr/local/bin/agent-sandbox"
                && w[2] == "/run/agent-sandbox/agent-sandbox"
        });
        assert!(mount, "{args:?}");
    }

    #[test]
    fn relative_self_exe_is_rejected() {
        let opts = ExecutorOptions {
            network: true,
            docker: false,
            self_exe: PathBuf::from("bin/agent-sandbox"),
        };
        assert!(create_executor_args(&[], &empty_setup(), &opts).is_err());
    }
}
