//! Boot-time launch records. The registrar owns the ordering (write the
//! artifact, then register it with the supervisor); each backend only knows
//! how to render its artifact and talk to its supervisor.

mod launchd;
mod startup_folder;
mod systemd;

pub use launchd::Launchd;
pub use startup_folder::StartupFolder;
pub use systemd::Systemd;

use crate::config::AutostartConfig;
use crate::error::LitpushError;
use crate::platform::{AutostartMechanism, HostPlatform};
use crate::runner::CommandRunner;
use crate::worker::{ProjectLayout, WorkerDescriptor};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// What a boot-time record has to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub interpreter: PathBuf,
    /// Console-less interpreter; equal to `interpreter` where none exists.
    pub windowless_interpreter: PathBuf,
    pub entry_point: PathBuf,
    pub working_directory: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

impl LaunchTarget {
    pub fn new(descriptor: &WorkerDescriptor, layout: &ProjectLayout) -> Self {
        Self {
            interpreter: descriptor.interpreter_path.clone(),
            windowless_interpreter: descriptor.windowless_interpreter(layout),
            entry_point: descriptor.entry_point_path.clone(),
            working_directory: descriptor.working_directory.clone(),
            stdout_log: layout.stdout_log.clone(),
            stderr_log: layout.stderr_log.clone(),
        }
    }
}

pub trait AutostartBackend {
    fn mechanism(&self) -> AutostartMechanism;

    fn artifact_path(&self) -> PathBuf;

    fn render(&self, target: &LaunchTarget) -> String;

    /// Older artifacts this backend replaces; removed on enable and disable.
    fn superseded_artifacts(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Hands the freshly written artifact to the supervisor.
    fn register(&self, _runner: &dyn CommandRunner) -> Result<bool, LitpushError> {
        Ok(false)
    }

    /// Runs before the artifact is deleted. `Ok(false)` means the supervisor
    /// had nothing registered; `Err` leaves the artifact in place.
    fn deregister(&self, _runner: &dyn CommandRunner) -> Result<bool, String> {
        Ok(false)
    }

    /// Runs after the artifact is deleted. Failures are logged, not returned.
    fn after_removal(&self, _runner: &dyn CommandRunner) {}
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnableOutcome {
    pub mechanism: AutostartMechanism,
    pub artifact: PathBuf,
    pub removed_legacy: Vec<PathBuf>,
    pub registered: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DisableOutcome {
    pub mechanism: AutostartMechanism,
    pub artifact: PathBuf,
    pub removed: bool,
    pub removed_legacy: Vec<PathBuf>,
    pub unregistered: bool,
}

pub struct AutostartRegistrar<'a> {
    backend: Box<dyn AutostartBackend>,
    runner: &'a dyn CommandRunner,
}

impl<'a> AutostartRegistrar<'a> {
    pub fn new(backend: Box<dyn AutostartBackend>, runner: &'a dyn CommandRunner) -> Self {
        Self { backend, runner }
    }

    /// Registrar for the host's native mechanism, rooted at the per-user
    /// autostart directory.
    pub fn for_platform(
        platform: HostPlatform,
        cfg: &AutostartConfig,
        runner: &'a dyn CommandRunner,
    ) -> Result<Self, LitpushError> {
        let dir = platform.autostart_dir()?;
        let backend: Box<dyn AutostartBackend> = match platform.autostart_mechanism() {
            AutostartMechanism::StartupFolder => Box::new(StartupFolder::new(
                dir,
                &cfg.startup_script_name,
                cfg.startup_delay_sec,
            )),
            AutostartMechanism::Launchd => Box::new(Launchd::new(dir, &cfg.launchd_label)),
            AutostartMechanism::Systemd => {
                Box::new(Systemd::new(dir, &cfg.systemd_unit, cfg.restart_sec))
            }
        };
        Ok(Self::new(backend, runner))
    }

    pub fn mechanism(&self) -> AutostartMechanism {
        self.backend.mechanism()
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.backend.artifact_path()
    }

    /// A leftover superseded artifact still launches the worker, so it
    /// counts as enabled.
    pub fn is_enabled(&self) -> bool {
        std::iter::once(self.backend.artifact_path())
            .chain(self.backend.superseded_artifacts())
            .any(|path| path.is_file())
    }

    pub fn enable(&self, target: &LaunchTarget) -> Result<EnableOutcome, LitpushError> {
        let mechanism = self.backend.mechanism();
        let artifact = self.backend.artifact_path();
        let content = self.backend.render(target);
        write_atomic_text_file(&artifact, &content).map_err(|err| {
            LitpushError::autostart(
                mechanism.as_str(),
                format!("failed to write {}: {err}", artifact.display()),
            )
        })?;
        tracing::info!(mechanism = mechanism.as_str(), artifact = %artifact.display(), "autostart artifact written");
        let removed_legacy = self.remove_superseded();
        let registered = self.backend.register(self.runner)?;
        Ok(EnableOutcome {
            mechanism,
            artifact,
            removed_legacy,
            registered,
        })
    }

    pub fn disable(&self) -> Result<DisableOutcome, LitpushError> {
        let mechanism = self.backend.mechanism();
        let artifact = self.backend.artifact_path();
        let unregistered = if artifact.is_file() {
            self.backend.deregister(self.runner).map_err(|message| {
                LitpushError::autostart(
                    mechanism.as_str(),
                    format!("{message}; {} left in place", artifact.display()),
                )
            })?
        } else {
            false
        };
        let removed = remove_if_present(&artifact).map_err(|err| {
            LitpushError::autostart(
                mechanism.as_str(),
                format!("failed to remove {}: {err}", artifact.display()),
            )
        })?;
        let removed_legacy = self.remove_superseded();
        if removed {
            self.backend.after_removal(self.runner);
            tracing::info!(mechanism = mechanism.as_str(), artifact = %artifact.display(), "autostart artifact removed");
        }
        Ok(DisableOutcome {
            mechanism,
            artifact,
            removed,
            removed_legacy,
            unregistered,
        })
    }

    fn remove_superseded(&self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        for path in self.backend.superseded_artifacts() {
            match remove_if_present(&path) {
                Ok(true) => {
                    tracing::info!(
                        artifact = %path.display(),
                        "removed superseded autostart artifact"
                    );
                    removed.push(path);
                }
                Ok(false) => {}
                Err(err) => tracing::warn!(
                    artifact = %path.display(),
                    error = %err,
                    "could not remove superseded autostart artifact"
                ),
            }
        }
        removed
    }
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

fn write_atomic_text_file(path: &Path, content: &str) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "litpush".to_string()),
        std::process::id(),
        ts
    ));
    fs::write(&tmp_path, content)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

/// Runs a supervisor command, folding spawn errors and non-zero exits into
/// one message.
pub(crate) fn run_supervisor(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<(), String> {
    let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
    let rendered = crate::runner::render_command(Path::new(program), &args);
    match runner.run(Path::new(program), &args, None) {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => Err(format!(
            "`{rendered}` exited with status {}: {}",
            output.status_code,
            output.combined()
        )),
        Err(err) => Err(format!("failed to run `{rendered}`: {err}")),
    }
}
