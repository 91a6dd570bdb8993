use std::collections::HashMap;
use std::path::PathBuf;

use agent_sandbox_arg0::arg0_dispatch_or_else;
use agent_sandbox_core::SandboxErr;
use agent_sandbox_core::bwrap::ExecutorOptions;
use agent_sandbox_core::bwrap::create_executor_args;
use agent_sandbox_core::config::ConfigOverrides;
use agent_sandbox_core::config::load_config;
use agent_sandbox_core::exec::ExecuteSandboxRequest;
use agent_sandbox_core::exec::execute_sandbox;
use agent_sandbox_core::path_access::resolve_paths;
use agent_sandbox_core::presets::PRESETS;
use agent_sandbox_core::presets::PresetContext;
use agent_sandbox_core::presets::expand_presets;
use agent_sandbox_core::wrappers::ensure_mount_sources_exist;
use agent_sandbox_core::wrappers::generate_wrappers;
use agent_sandbox_wrap::WrapperMode;
use agent_sandbox_wrap::run_wrap_binary;
use clap::Args;
use clap::CommandFactory;
use clap::Parser;
use clap_complete::Shell;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Run a command inside a filesystem sandbox.
#[derive(Debug, Parser)]
#[clap(
    author,
    version,
    // The executable may be invoked through a wrapper trampoline path, but
    // help output should always show the plain tool name.
    bin_name = "agent-sandbox",
    override_usage = "agent-sandbox [OPTIONS] <COMMAND> [ARGS]...\n       agent-sandbox [OPTIONS] <SUBCOMMAND>"
)]
struct MultitoolCli {
    #[clap(flatten)]
    flags: SandboxFlags,

    #[clap(subcommand)]
    subcommand: Option<Subcommand>,

    /// Command to run inside the sandbox.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct SandboxFlags {
    /// Use this config file instead of the project config.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Verbose diagnostics: log every resolved path with its origin.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// Allow network access inside the sandbox (overrides config).
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    network: Option<bool>,

    /// Expose the Docker socket inside the sandbox (overrides config).
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_name = "BOOL"
    )]
    docker: Option<bool>,

    /// Additional read-only path (repeatable).
    #[arg(long, value_name = "PATH")]
    ro: Vec<String>,

    /// Additional writable path (repeatable).
    #[arg(long, value_name = "PATH")]
    rw: Vec<String>,

    /// Path to hide from the sandbox entirely (repeatable).
    #[arg(long, value_name = "PATH")]
    exclude: Vec<String>,

    /// Command rule override, e.g. `--cmd git=@git` or `--cmd npm=false`
    /// (repeatable; accepts comma-separated lists).
    #[arg(long, value_name = "KEY=VALUE[,KEY=VALUE...]")]
    cmd: Vec<String>,

    /// List the built-in filesystem presets and exit.
    #[arg(long, default_value_t = false)]
    list_presets: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Generate shell completion scripts.
    Completion(CompletionCommand),

    /// Internal: policy entry point for wrapped binaries. Only functional
    /// inside a running sandbox.
    #[clap(hide = true, name = "wrap-binary")]
    WrapBinary(WrapBinaryCommand),
}

#[derive(Debug, Parser)]
struct CompletionCommand {
    /// Shell to generate completions for.
    #[clap(value_enum, default_value_t = Shell::Bash)]
    shell: Shell,
}

#[derive(Debug, Parser)]
struct WrapBinaryCommand {
    /// Built-in policy to apply, e.g. `@git`.
    #[arg(long, value_name = "PRESET", conflicts_with = "script")]
    preset: Option<String>,

    /// User wrapper script to hand control to.
    #[arg(long, value_name = "PATH")]
    script: Option<PathBuf>,

    /// The wrapped command's name.
    #[arg(value_name = "CMD")]
    cmd: String,

    /// The wrapped command's original arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    args: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    arg0_dispatch_or_else(|| async move {
        let cli = MultitoolCli::parse();
        init_logging(cli.flags.debug);

        match cli.subcommand {
            Some(Subcommand::Completion(command)) => {
                print_completion(command);
                Ok(())
            }
            Some(Subcommand::WrapBinary(command)) => run_wrap_binary_cmd(command),
            None if cli.flags.list_presets => {
                print_presets();
                Ok(())
            }
            None => run_sandbox(cli.flags, cli.command).await,
        }
    })
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_completion(command: CompletionCommand) {
    let mut app = MultitoolCli::command();
    let name = app.get_name().to_string();
    generate(command.shell, &mut app, name, &mut std::io::stdout());
}

fn print_presets() {
    for preset in PRESETS {
        let name = format!("@{}", preset.name);
        let kind = if preset.composite { "composite" } else { "simple" };
        let description = preset.description;
        println!("{name:<15} {kind:<9} {description}");
    }
}

fn run_wrap_binary_cmd(command: WrapBinaryCommand) -> anyhow::Result<()> {
    let mode = match (command.preset, command.script) {
        (Some(preset), None) => WrapperMode::Preset(preset),
        (None, Some(script)) => WrapperMode::Script(script),
        _ => {
            eprintln!("agent-sandbox: wrap-binary requires exactly one of --preset or --script");
            std::process::exit(1);
        }
    };
    // Returns only on failure; on success the process image was replaced.
    let err = run_wrap_binary(mode, &command.cmd, command.args);
    eprintln!("agent-sandbox: {err}");
    std::process::exit(err.exit_code());
}

async fn run_sandbox(flags: SandboxFlags, command: Vec<String>) -> anyhow::Result<()> {
    if command.is_empty() {
        eprintln!("agent-sandbox: no command specified");
        std::process::exit(1);
    }

    let exit_code = match launch(flags, command).await {
        Ok(code) => code,
        Err(SandboxErr::Cancelled) => {
            // The caller asked for the kill; that is a clean shutdown.
            debug!("sandboxed command cancelled by caller");
            0
        }
        Err(err) => {
            eprintln!("agent-sandbox: {err}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn launch(flags: SandboxFlags, command: Vec<String>) -> Result<i32, SandboxErr> {
    let work_dir = std::env::current_dir()?;
    let home_dir = dirs::home_dir()
        .ok_or_else(|| SandboxErr::Config("cannot determine home directory".to_string()))?;
    let xdg_config_home = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from);

    let overrides = ConfigOverrides {
        config_path: flags.config,
        network: flags.network,
        docker: flags.docker,
        ro: flags.ro,
        rw: flags.rw,
        exclude: flags.exclude,
        cmd: flags.cmd,
    };
    let config = load_config(
        &work_dir,
        &home_dir,
        xdg_config_home.as_deref(),
        &overrides,
    )?;

    let ctx = PresetContext {
        home_dir,
        work_dir: work_dir.clone(),
        loaded_config_paths: config.loaded_config_paths(),
    };
    let preset_paths = expand_presets(&config.presets, &ctx)?;
    let resolved = resolve_paths(&preset_paths, &config.filesystem, &ctx);
    for path in &resolved {
        debug!(
            "path rule: {} {} (from {}, pattern {:?})",
            path.access,
            path.absolute_path.display(),
            path.source,
            path.original_pattern
        );
    }

    let path_env = std::env::var("PATH").ok();
    let setup = generate_wrappers(&config.commands, path_env.as_deref())?;
    ensure_mount_sources_exist(&setup)?;

    let executor_args = create_executor_args(
        &resolved,
        &setup,
        &ExecutorOptions {
            network: config.network,
            docker: config.docker,
            self_exe: std::env::current_exe()?,
        },
    )?;

    let cancel = CancellationToken::new();
    let force_kill = CancellationToken::new();
    spawn_ctrl_c_escalation(cancel.clone(), force_kill.clone());

    debug!(
        "launching in {} with network={} docker={}",
        config.effective_cwd.display(),
        config.network,
        config.docker
    );
    let exit_code = execute_sandbox(ExecuteSandboxRequest {
        executor_args,
        command,
        env: child_env(),
        cancel,
        force_kill,
    })
    .await?;

    // Wrapper staging stays alive until the child has exited.
    drop(setup);
    Ok(exit_code)
}

/// First Ctrl-C requests a graceful stop (SIGTERM); a second one escalates
/// to SIGKILL.
fn spawn_ctrl_c_escalation(cancel: CancellationToken, force_kill: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            force_kill.cancel();
        }
    });
}

/// The child environment: the caller's, with TMPDIR pinned to the sandbox's
/// normalized scratch location.
fn child_env() -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("TMPDIR".to_string(), "/tmp".to_string());
    env
}
