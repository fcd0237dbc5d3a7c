mod autostart;
mod config;
mod error;
mod lifecycle;
mod locator;
mod platform;
mod probe;
mod provision;
mod runner;
mod worker;

use crate::autostart::{AutostartRegistrar, LaunchTarget};
use crate::config::{
    load_config_or_default, read_config, resolve_config_path, resolve_project_root, Config,
    DEFAULT_CONFIG_YAML,
};
use crate::error::{ErrorDetails, LitpushError};
use crate::lifecycle::{LifecycleController, StartOutcome, StopOutcome, WorkerState};
use crate::platform::HostPlatform;
use crate::probe::{probe, ReadinessReport};
use crate::provision::{provision, ProvisionReport};
use crate::runner::{CommandRunner, RealCommandRunner};
use crate::worker::{ProjectLayout, WorkerDescriptor};
use clap::{Parser, Subcommand};
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_ENV: &str = "LITPUSH_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "litpush",
    version,
    about = "Lifecycle and autostart controller for the literature push worker"
)]
struct Cli {
    /// Worker project directory [env: LITPUSH_PROJECT_ROOT] [default: current directory]
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
    /// Config file [env: LITPUSH_CONFIG] [default: <project-root>/litpush.yaml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    /// Provision the environment first if it is not ready
    #[arg(long, global = true)]
    setup: bool,
    #[arg(long, global = true, hide = true, value_parser = ["windows", "macos", "linux"])]
    platform: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the worker in the background
    Start,
    /// Ask the worker to exit, forcing it after the poll window
    Stop,
    Restart,
    /// Run the worker attached to this terminal
    Run {
        /// Arguments passed through to the worker, e.g. --force-run
        #[arg(last = true)]
        args: Vec<String>,
    },
    Status,
    /// Report whether the environment is ready to run the worker
    Check,
    /// Create the isolated environment and install dependencies
    Setup {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    EnableAutostart,
    DisableAutostart,
    Paths,
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write the default config template
    Init {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    Validate,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ErrorDetails>,
}

#[derive(Debug, Clone)]
struct Context {
    project_root: PathBuf,
    config_path: PathBuf,
    platform: HostPlatform,
    json: bool,
}

impl Context {
    fn load(&self) -> Result<(Config, ProjectLayout), LitpushError> {
        let cfg = load_config_or_default(&self.config_path)?;
        let layout = ProjectLayout::new(&self.project_root, &cfg, self.platform);
        Ok((cfg, layout))
    }
}

fn main() -> Result<(), LitpushError> {
    init_tracing();
    let cli = Cli::parse();
    let json = cli.json;
    let runner = RealCommandRunner;

    let result = build_context(&cli).and_then(|ctx| {
        if cli.setup && wants_ready_environment(&cli.command) {
            ensure_ready(&ctx, &runner)?;
        }
        dispatch(&ctx, cli.command, &runner)
    });

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            report_error(json, &err)?;
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
}

fn build_context(cli: &Cli) -> Result<Context, LitpushError> {
    let project_root = resolve_project_root(cli.project_root.as_ref());
    let config_path = resolve_config_path(cli.config.as_ref(), &project_root);
    let platform = match cli.platform.as_deref() {
        Some(os) => HostPlatform::parse(os)?,
        None => HostPlatform::current()?,
    };
    tracing::debug!(root = %project_root.display(), config = %config_path.display(), platform = platform.as_str(), "context resolved");
    Ok(Context {
        project_root,
        config_path,
        platform,
        json: cli.json,
    })
}

fn dispatch(
    ctx: &Context,
    command: Commands,
    runner: &dyn CommandRunner,
) -> Result<i32, LitpushError> {
    match command {
        Commands::Start => handle_start(ctx).map(|_| 0),
        Commands::Stop => handle_stop(ctx).map(|_| 0),
        Commands::Restart => handle_restart(ctx).map(|_| 0),
        Commands::Run { args } => handle_run(ctx, &args),
        Commands::Status => handle_status(ctx, runner).map(|_| 0),
        Commands::Check => handle_check(ctx, runner),
        Commands::Setup { yes } => handle_setup(ctx, yes, runner).map(|_| 0),
        Commands::EnableAutostart => handle_enable_autostart(ctx, runner).map(|_| 0),
        Commands::DisableAutostart => handle_disable_autostart(ctx, runner).map(|_| 0),
        Commands::Paths => handle_paths(ctx, runner).map(|_| 0),
        Commands::Config { command } => handle_config(ctx, command).map(|_| 0),
    }
}

fn wants_ready_environment(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Start | Commands::Restart | Commands::Run { .. } | Commands::EnableAutostart
    )
}

/// `--setup`: provision only when the probe says the environment is not ready.
fn ensure_ready(ctx: &Context, runner: &dyn CommandRunner) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let report = probe(&layout, &cfg, ctx.platform, runner);
    if report.ready() {
        return Ok(());
    }
    tracing::info!(missing = ?report.missing, "environment not ready; provisioning");
    provision_and_verify(ctx, &cfg, &layout, runner).map(|_| ())
}

fn provision_and_verify(
    ctx: &Context,
    cfg: &Config,
    layout: &ProjectLayout,
    runner: &dyn CommandRunner,
) -> Result<(ProvisionReport, ReadinessReport), LitpushError> {
    let provisioned = provision(layout, cfg, ctx.platform, runner)?;
    let after = probe(layout, cfg, ctx.platform, runner);
    if !after.ready() {
        return Err(LitpushError::EnvironmentNotReady {
            missing: after.missing.clone(),
        });
    }
    Ok((provisioned, after))
}

fn controller<'a>(ctx: &Context, cfg: &Config, layout: &'a ProjectLayout) -> LifecycleController<'a> {
    LifecycleController::new(layout, ctx.platform, cfg.shutdown.timing())
}

fn handle_start(ctx: &Context) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let outcome = controller(ctx, &cfg, &layout).start()?;
    output(ctx, describe_start(&outcome), serde_json::to_value(&outcome)?)
}

fn handle_stop(ctx: &Context) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let outcome = controller(ctx, &cfg, &layout).stop()?;
    output(ctx, describe_stop(&outcome), serde_json::to_value(&outcome)?)
}

fn handle_restart(ctx: &Context) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let outcome = controller(ctx, &cfg, &layout).restart()?;
    let line = format!("{}; {}", describe_stop(&outcome.stop), describe_start(&outcome.start));
    output(ctx, line, serde_json::to_value(&outcome)?)
}

fn handle_run(ctx: &Context, args: &[String]) -> Result<i32, LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let status = controller(ctx, &cfg, &layout).run_foreground(args)?;
    let code = status.code().unwrap_or(1);
    if ctx.json {
        output(ctx, String::new(), json!({"exit_code": code}))?;
    } else if code != 0 {
        eprintln!("{}", style(format!("worker exited with status {code}")).dim());
    }
    Ok(code)
}

fn handle_status(ctx: &Context, runner: &dyn CommandRunner) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let state = controller(ctx, &cfg, &layout).status();
    let registrar = AutostartRegistrar::for_platform(ctx.platform, &cfg.autostart, runner)?;
    let enabled = registrar.is_enabled();

    let worker_line = match &state {
        WorkerState::Running(handle) => format!(
            "{} (pid {})",
            style("running").green().bold(),
            handle.pid
        ),
        WorkerState::Stopped => style("stopped").yellow().bold().to_string(),
    };
    let autostart_line = if enabled {
        format!("autostart {} ({})", style("enabled").green(), registrar.mechanism().as_str())
    } else {
        format!("autostart {}", style("disabled").dim())
    };
    output(
        ctx,
        format!("worker {worker_line}\n{autostart_line}"),
        json!({
            "worker": state,
            "autostart": {
                "mechanism": registrar.mechanism(),
                "enabled": enabled,
                "artifact": registrar.artifact_path(),
            },
        }),
    )
}

fn handle_check(ctx: &Context, runner: &dyn CommandRunner) -> Result<i32, LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let report = probe(&layout, &cfg, ctx.platform, runner);
    let payload = json!({
        "ready": report.ready(),
        "checks": report.checks(),
        "missing": report.missing,
    });
    if report.ready() {
        output(ctx, format!("{} environment ready", style("ok").green().bold()), payload)?;
        return Ok(0);
    }
    let err = LitpushError::EnvironmentNotReady {
        missing: report.missing.clone(),
    };
    if ctx.json {
        print_json(&JsonResult {
            ok: false,
            result: Some(payload),
            error: Some(err.to_string()),
            error_details: err.details(),
        })?;
    } else {
        for check in report.checks() {
            if check.ok {
                println!("{} {}", style("ok").green(), check.message);
            } else {
                println!("{} {}", style("fail").red(), check.message);
                println!("     {}", style(check.remediation).dim());
            }
        }
        eprintln!("{} {err}", style("error:").red().bold());
    }
    Ok(1)
}

fn handle_setup(ctx: &Context, yes: bool, runner: &dyn CommandRunner) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let before = probe(&layout, &cfg, ctx.platform, runner);
    if !yes {
        if !io::stdin().is_terminal() {
            return Err(LitpushError::Config(
                "setup needs confirmation; re-run with --yes when stdin is not a terminal"
                    .to_string(),
            ));
        }
        let action = if before.isolated_env_present {
            "Reinstall dependencies into"
        } else {
            "Create"
        };
        let proceed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!(
                "{action} the isolated environment at {}?",
                layout.venv_dir.display()
            ))
            .default(true)
            .interact()?;
        if !proceed {
            return output(
                ctx,
                style("setup cancelled").dim().to_string(),
                json!({"cancelled": true}),
            );
        }
    }
    let (provisioned, after) = provision_and_verify(ctx, &cfg, &layout, runner)?;
    let line = if provisioned.env_created {
        format!(
            "{} created {} and installed dependencies",
            style("ok").green().bold(),
            layout.venv_dir.display()
        )
    } else {
        format!("{} dependencies installed", style("ok").green().bold())
    };
    output(
        ctx,
        line,
        json!({
            "env_created": provisioned.env_created,
            "dependencies_installed": provisioned.dependencies_installed,
            "ready": after.ready(),
        }),
    )
}

fn handle_enable_autostart(ctx: &Context, runner: &dyn CommandRunner) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let descriptor = WorkerDescriptor::resolve(&layout)?;
    let registrar = AutostartRegistrar::for_platform(ctx.platform, &cfg.autostart, runner)?;
    let outcome = registrar.enable(&LaunchTarget::new(&descriptor, &layout))?;
    output(
        ctx,
        format!(
            "{} autostart via {} ({}){}",
            style("enabled").green().bold(),
            outcome.mechanism.as_str(),
            outcome.artifact.display(),
            legacy_note(&outcome.removed_legacy)
        ),
        serde_json::to_value(&outcome)?,
    )
}

fn handle_disable_autostart(ctx: &Context, runner: &dyn CommandRunner) -> Result<(), LitpushError> {
    let (cfg, _layout) = ctx.load()?;
    let registrar = AutostartRegistrar::for_platform(ctx.platform, &cfg.autostart, runner)?;
    let outcome = registrar.disable()?;
    let line = if outcome.removed {
        format!(
            "{} autostart ({} removed{}){}",
            style("disabled").yellow().bold(),
            outcome.artifact.display(),
            if outcome.unregistered {
                format!(", unregistered from {}", outcome.mechanism.as_str())
            } else {
                String::new()
            },
            legacy_note(&outcome.removed_legacy)
        )
    } else if !outcome.removed_legacy.is_empty() {
        format!(
            "{} autostart{}",
            style("disabled").yellow().bold(),
            legacy_note(&outcome.removed_legacy)
        )
    } else {
        format!("autostart already {}", style("disabled").dim())
    };
    output(ctx, line, serde_json::to_value(&outcome)?)
}

fn legacy_note(removed: &[PathBuf]) -> String {
    if removed.is_empty() {
        return String::new();
    }
    let paths: Vec<String> = removed.iter().map(|path| path.display().to_string()).collect();
    format!("; removed legacy {}", paths.join(", "))
}

fn handle_paths(ctx: &Context, runner: &dyn CommandRunner) -> Result<(), LitpushError> {
    let (cfg, layout) = ctx.load()?;
    let registrar = AutostartRegistrar::for_platform(ctx.platform, &cfg.autostart, runner)?;
    let entries: Vec<(&str, PathBuf)> = vec![
        ("project_root", layout.root.clone()),
        ("config_path", ctx.config_path.clone()),
        ("venv_dir", layout.venv_dir.clone()),
        ("interpreter", layout.interpreter.clone()),
        ("entry_point", layout.entry_point.clone()),
        ("requirements", layout.requirements.clone()),
        ("signal_file", layout.signal_file.clone()),
        ("stdout_log", layout.stdout_log.clone()),
        ("stderr_log", layout.stderr_log.clone()),
        ("autostart_artifact", registrar.artifact_path()),
    ];
    let human = entries
        .iter()
        .map(|(key, path)| format!("{}: {}", style(key).bold(), path.display()))
        .collect::<Vec<_>>()
        .join("\n");
    let mut payload = serde_json::Map::new();
    for (key, path) in &entries {
        payload.insert(key.to_string(), json!(path));
    }
    payload.insert("config_exists".to_string(), json!(ctx.config_path.exists()));
    payload.insert("platform".to_string(), json!(ctx.platform));
    payload.insert("autostart_mechanism".to_string(), json!(registrar.mechanism()));
    output(ctx, human, serde_json::Value::Object(payload))
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), LitpushError> {
    match command {
        ConfigCommand::Init { force } => {
            if ctx.config_path.exists() && !force {
                return output(
                    ctx,
                    format!("config already exists at {}", ctx.config_path.display()),
                    json!({"path": ctx.config_path, "created": false}),
                );
            }
            if let Some(parent) = ctx.config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(
                ctx,
                format!("wrote {}", ctx.config_path.display()),
                json!({"path": ctx.config_path, "created": true}),
            )
        }
        ConfigCommand::Validate => {
            let _cfg = read_config(&ctx.config_path)?;
            output(
                ctx,
                format!("{} {}", style("valid").green().bold(), ctx.config_path.display()),
                json!({"path": ctx.config_path, "valid": true}),
            )
        }
    }
}

fn describe_start(outcome: &StartOutcome) -> String {
    match outcome {
        StartOutcome::Launched { pid } => {
            format!("{} worker (pid {pid})", style("started").green().bold())
        }
        StartOutcome::AlreadyRunning(handle) => {
            format!("worker already running (pid {})", handle.pid)
        }
    }
}

fn describe_stop(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::NotRunning => "worker not running".to_string(),
        StopOutcome::Graceful { pid, .. } => {
            format!("{} worker (pid {pid})", style("stopped").green().bold())
        }
        StopOutcome::Forced { pid } => format!(
            "{} worker (pid {pid}) after it ignored the shutdown signal",
            style("killed").yellow().bold()
        ),
    }
}

fn report_error(json: bool, err: &LitpushError) -> Result<(), LitpushError> {
    let details = err.details();
    if json {
        return print_json(&JsonResult::<serde_json::Value> {
            ok: false,
            result: None,
            error: Some(err.to_string()),
            error_details: details,
        });
    }
    eprintln!("{} {err}", style("error:").red().bold());
    if let Some(details) = details {
        if let Some(raw) = details.raw_output {
            eprintln!("{raw}");
        }
        if let Some(hint) = details.hint {
            eprintln!("{}", style(hint).dim());
        }
    }
    Ok(())
}

fn output(ctx: &Context, human: String, payload: serde_json::Value) -> Result<(), LitpushError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_details: None,
        };
        print_json(&wrapper)?;
    } else if !human.is_empty() {
        println!("{human}");
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), LitpushError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
