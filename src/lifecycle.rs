use crate::config::StopTiming;
use crate::error::LitpushError;
use crate::locator::{force_kill, pid_alive, ProcessHandle, ProcessLocator};
use crate::platform::HostPlatform;
use crate::worker::{ProjectLayout, WorkerDescriptor};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const KILL_CONFIRM_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkerState {
    Running(ProcessHandle),
    Stopped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    AlreadyRunning(ProcessHandle),
    Launched { pid: u32 },
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            Self::AlreadyRunning(handle) => handle.pid,
            Self::Launched { pid } => *pid,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StopOutcome {
    NotRunning,
    /// The worker exited on its own after seeing the shutdown signal.
    Graceful { pid: u32, polls: u32 },
    /// The poll window ran out and the worker was killed; unflushed work may
    /// have been lost.
    Forced { pid: u32 },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestartOutcome {
    pub stop: StopOutcome,
    pub start: StartOutcome,
}

/// Start/stop/restart/run for the worker. Holds no process state: every
/// decision re-queries the OS through the locator.
pub struct LifecycleController<'a> {
    layout: &'a ProjectLayout,
    locator: ProcessLocator,
    timing: StopTiming,
}

impl<'a> LifecycleController<'a> {
    pub fn new(layout: &'a ProjectLayout, platform: HostPlatform, timing: StopTiming) -> Self {
        Self {
            layout,
            locator: ProcessLocator::new(platform),
            timing,
        }
    }

    pub fn locate(&self) -> Option<ProcessHandle> {
        self.locator.locate(&WorkerDescriptor::expected(self.layout))
    }

    pub fn status(&self) -> WorkerState {
        match self.locate() {
            Some(handle) => WorkerState::Running(handle),
            None => WorkerState::Stopped,
        }
    }

    pub fn start(&self) -> Result<StartOutcome, LitpushError> {
        if let Some(handle) = self.locate() {
            tracing::info!(pid = handle.pid, "worker already running");
            return Ok(StartOutcome::AlreadyRunning(handle));
        }
        let descriptor = WorkerDescriptor::resolve(self.layout)?;
        // A leftover signal would make the new worker exit on its first poll.
        clear_signal(&self.layout.signal_file);
        let stdout = open_log(&self.layout.stdout_log)?;
        let stderr = open_log(&self.layout.stderr_log)?;
        write_launch_header(&stdout, &descriptor)?;

        let mut cmd = Command::new(&descriptor.interpreter_path);
        cmd.arg(&descriptor.entry_point_path)
            .current_dir(&descriptor.working_directory)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        detach(&mut cmd);
        let child = cmd.spawn().map_err(|source| LitpushError::Launch {
            program: descriptor.interpreter_path.display().to_string(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(pid, entry = %descriptor.entry_point_path.display(), "worker launched");
        Ok(StartOutcome::Launched { pid })
    }

    pub fn stop(&self) -> Result<StopOutcome, LitpushError> {
        let Some(handle) = self.locate() else {
            clear_signal(&self.layout.signal_file);
            return Ok(StopOutcome::NotRunning);
        };
        let pid = handle.pid;
        File::create(&self.layout.signal_file)?;
        tracing::info!(pid, signal = %self.layout.signal_file.display(), "shutdown signal created");

        for poll in 1..=self.timing.poll_attempts {
            thread::sleep(self.timing.poll_interval);
            if self.locate().is_none() {
                clear_signal(&self.layout.signal_file);
                tracing::info!(pid, polls = poll, "worker exited gracefully");
                return Ok(StopOutcome::Graceful { pid, polls: poll });
            }
        }

        clear_signal(&self.layout.signal_file);
        tracing::warn!(
            pid,
            attempts = self.timing.poll_attempts,
            "worker ignored shutdown signal; forcing termination"
        );
        let killed = force_kill(pid).map_err(|message| LitpushError::Terminate { pid, message })?;
        if !killed {
            return Ok(StopOutcome::Graceful {
                pid,
                polls: self.timing.poll_attempts,
            });
        }
        self.wait_for_exit(pid)?;
        Ok(StopOutcome::Forced { pid })
    }

    pub fn restart(&self) -> Result<RestartOutcome, LitpushError> {
        let stop = self.stop()?;
        thread::sleep(self.timing.restart_settle);
        let start = self.start()?;
        tracing::info!(pid = start.pid(), "worker restarted");
        Ok(RestartOutcome { stop, start })
    }

    /// Runs the worker attached to the caller's terminal until it exits.
    pub fn run_foreground(&self, worker_args: &[String]) -> Result<ExitStatus, LitpushError> {
        let descriptor = WorkerDescriptor::resolve(self.layout)?;
        if let Some(handle) = self.locate() {
            tracing::warn!(
                pid = handle.pid,
                "a background worker is already running; both instances will share state"
            );
        }
        Command::new(&descriptor.interpreter_path)
            .arg(&descriptor.entry_point_path)
            .args(worker_args)
            .current_dir(&descriptor.working_directory)
            .status()
            .map_err(|source| LitpushError::Launch {
                program: descriptor.interpreter_path.display().to_string(),
                source,
            })
    }

    fn wait_for_exit(&self, pid: u32) -> Result<(), LitpushError> {
        let deadline = Instant::now() + self.timing.kill_confirm;
        loop {
            if !pid_alive(pid) && self.locate().is_none() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LitpushError::Terminate {
                    pid,
                    message: format!(
                        "process still present {}ms after kill",
                        self.timing.kill_confirm.as_millis()
                    ),
                });
            }
            thread::sleep(KILL_CONFIRM_POLL);
        }
    }
}

fn clear_signal(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(signal = %path.display(), "removed leftover shutdown signal"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(signal = %path.display(), error = %err, "could not remove shutdown signal"),
    }
}

fn open_log(path: &Path) -> Result<File, LitpushError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn write_launch_header(log: &File, descriptor: &WorkerDescriptor) -> Result<(), LitpushError> {
    let mut log = log;
    writeln!(
        log,
        "=== litpush start {} :: {} {} ===",
        Utc::now().to_rfc3339(),
        descriptor.interpreter_path.display(),
        descriptor.entry_point_path.display()
    )?;
    Ok(())
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::os::unix::fs::symlink;
    use tempfile::{tempdir, TempDir};

    const COOPERATIVE_WORKER: &str = "\
while [ ! -f .stop_signal ]; do sleep 0.05; done
rm -f .stop_signal
";

    const STUBBORN_WORKER: &str = "\
while true; do sleep 0.05; done
";

    fn fast_timing() -> StopTiming {
        StopTiming {
            poll_interval: Duration::from_millis(100),
            poll_attempts: 10,
            kill_confirm: Duration::from_secs(3),
            restart_settle: Duration::from_millis(200),
        }
    }

    /// A project whose environment interpreter is a symlink to `/bin/sh`, so
    /// the process shows up as `python` running `<root>/main.py`.
    fn shell_project(worker: &str) -> (TempDir, ProjectLayout) {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), &Config::default(), HostPlatform::Linux);
        fs::create_dir_all(layout.interpreter.parent().unwrap()).unwrap();
        symlink("/bin/sh", &layout.interpreter).unwrap();
        fs::write(&layout.entry_point, worker).unwrap();
        (dir, layout)
    }

    fn wait_until_located(controller: &LifecycleController<'_>) -> ProcessHandle {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(handle) = controller.locate() {
                return handle;
            }
            assert!(Instant::now() < deadline, "worker never appeared");
            thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn start_launches_worker_that_locate_finds() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());
        assert_eq!(controller.status(), WorkerState::Stopped);

        let outcome = controller.start().expect("start");
        let pid = match outcome {
            StartOutcome::Launched { pid } => pid,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let handle = wait_until_located(&controller);
        assert_eq!(handle.pid, pid);
        assert!(handle
            .command_line
            .contains(&layout.entry_point.to_string_lossy().to_string()));
        assert!(fs::read_to_string(&layout.stdout_log)
            .unwrap()
            .contains("litpush start"));

        controller.stop().expect("cleanup");
    }

    #[test]
    fn start_twice_yields_one_process() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        let first = controller.start().expect("first start");
        wait_until_located(&controller);
        let second = controller.start().expect("second start");

        match &second {
            StartOutcome::AlreadyRunning(handle) => assert_eq!(handle.pid, first.pid()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        controller.stop().expect("cleanup");
    }

    #[test]
    fn cooperative_worker_stops_gracefully() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());
        controller.start().expect("start");
        let handle = wait_until_located(&controller);

        let outcome = controller.stop().expect("stop");

        assert!(
            matches!(outcome, StopOutcome::Graceful { pid, .. } if pid == handle.pid),
            "unexpected outcome: {outcome:?}"
        );
        assert!(controller.locate().is_none());
        assert!(!layout.signal_file.exists());
    }

    #[test]
    fn stubborn_worker_is_forced_after_poll_window() {
        let (_dir, layout) = shell_project(STUBBORN_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());
        controller.start().expect("start");
        let handle = wait_until_located(&controller);

        let started = Instant::now();
        let outcome = controller.stop().expect("stop");

        assert_eq!(outcome, StopOutcome::Forced { pid: handle.pid });
        assert!(started.elapsed() >= Duration::from_millis(1_000));
        assert!(controller.locate().is_none());
        assert!(!layout.signal_file.exists());
    }

    #[test]
    fn stop_twice_is_a_quiet_no_op() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());
        controller.start().expect("start");
        wait_until_located(&controller);

        controller.stop().expect("first stop");
        let second = controller.stop().expect("second stop");

        assert_eq!(second, StopOutcome::NotRunning);
        assert!(controller.locate().is_none());
    }

    #[test]
    fn stop_when_never_started_clears_stale_signal() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        fs::write(&layout.signal_file, "").unwrap();
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        assert_eq!(controller.stop().expect("stop"), StopOutcome::NotRunning);
        assert!(!layout.signal_file.exists());
    }

    #[test]
    fn restart_replaces_the_process() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());
        controller.start().expect("start");
        let before = wait_until_located(&controller);

        let outcome = controller.restart().expect("restart");

        assert!(matches!(outcome.stop, StopOutcome::Graceful { .. }));
        let after = wait_until_located(&controller);
        assert_ne!(after.pid, before.pid);
        assert_eq!(after.pid, outcome.start.pid());
        controller.stop().expect("cleanup");
    }

    #[test]
    fn restart_when_stopped_degenerates_to_start() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        let outcome = controller.restart().expect("restart");

        assert_eq!(outcome.stop, StopOutcome::NotRunning);
        assert!(matches!(outcome.start, StartOutcome::Launched { .. }));
        wait_until_located(&controller);
        controller.stop().expect("cleanup");
    }

    #[test]
    fn start_discards_stale_signal_before_launch() {
        let (_dir, layout) = shell_project(COOPERATIVE_WORKER);
        fs::write(&layout.signal_file, "").unwrap();
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        controller.start().expect("start");
        let handle = wait_until_located(&controller);
        thread::sleep(Duration::from_millis(300));

        assert_eq!(controller.locate().map(|h| h.pid), Some(handle.pid));
        controller.stop().expect("cleanup");
    }

    #[test]
    fn start_without_environment_is_not_ready() {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), &Config::default(), HostPlatform::Linux);
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        let err = controller.start().expect_err("no environment");
        assert!(matches!(err, LitpushError::EnvironmentNotReady { .. }));
        assert!(!layout.stdout_log.exists());
    }

    #[test]
    fn unexecutable_interpreter_is_a_launch_error() {
        let dir = tempdir().unwrap();
        // Present but not executable: resolves fine, spawn fails.
        let layout = crate::worker::testing::fake_project(dir.path(), HostPlatform::Linux);
        fs::write(&layout.signal_file, "").unwrap();
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        let err = controller.start().expect_err("interpreter cannot be executed");

        match &err {
            LitpushError::Launch { program, .. } => {
                assert_eq!(program, &layout.interpreter.display().to_string())
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(controller.locate().is_none());
        assert!(!layout.signal_file.exists());
    }

    #[test]
    fn run_foreground_returns_worker_exit_status() {
        let (_dir, layout) = shell_project("exit \"${1:-0}\"\n");
        let controller = LifecycleController::new(&layout, HostPlatform::Linux, fast_timing());

        let ok = controller.run_foreground(&[]).expect("run");
        assert!(ok.success());
        let failed = controller.run_foreground(&["3".to_string()]).expect("run");
        assert_eq!(failed.code(), Some(3));
    }
}
