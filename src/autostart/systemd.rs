use super::{run_supervisor, AutostartBackend, LaunchTarget};
use crate::error::LitpushError;
use crate::platform::AutostartMechanism;
use crate::runner::CommandRunner;
use std::path::{Path, PathBuf};

const SYSTEMCTL: &str = "systemctl";

/// `systemctl disable` output meaning the unit was never enabled.
const NOT_ENABLED: [&str; 2] = ["does not exist", "not loaded"];

/// `systemd --user` service unit under `~/.config/systemd/user`.
pub struct Systemd {
    dir: PathBuf,
    unit: String,
    restart_sec: u64,
}

impl Systemd {
    pub fn new(dir: PathBuf, unit: &str, restart_sec: u64) -> Self {
        Self {
            dir,
            unit: unit.to_string(),
            restart_sec,
        }
    }

    fn unit_file_name(&self) -> String {
        format!("{}.service", self.unit)
    }
}

impl AutostartBackend for Systemd {
    fn mechanism(&self) -> AutostartMechanism {
        AutostartMechanism::Systemd
    }

    fn artifact_path(&self) -> PathBuf {
        self.dir.join(self.unit_file_name())
    }

    fn render(&self, target: &LaunchTarget) -> String {
        generate_unit(target, self.restart_sec)
    }

    fn register(&self, runner: &dyn CommandRunner) -> Result<bool, LitpushError> {
        let unit = self.unit_file_name();
        for args in [vec!["--user", "daemon-reload"], vec!["--user", "enable", unit.as_str()]] {
            run_supervisor(runner, SYSTEMCTL, &args).map_err(|message| {
                LitpushError::autostart(AutostartMechanism::Systemd.as_str(), message)
            })?;
        }
        tracing::info!(unit = %unit, "user unit enabled");
        Ok(true)
    }

    fn deregister(&self, runner: &dyn CommandRunner) -> Result<bool, String> {
        let unit = self.unit_file_name();
        match run_supervisor(runner, SYSTEMCTL, &["--user", "disable", unit.as_str()]) {
            Ok(()) => Ok(true),
            Err(message) if NOT_ENABLED.iter().any(|needle| message.contains(needle)) => {
                tracing::debug!(%message, "user unit was not enabled");
                Ok(false)
            }
            Err(message) => Err(message),
        }
    }

    fn after_removal(&self, runner: &dyn CommandRunner) {
        if let Err(message) = run_supervisor(runner, SYSTEMCTL, &["--user", "daemon-reload"]) {
            tracing::warn!(%message, "systemctl daemon-reload failed");
        }
    }
}

pub fn generate_unit(target: &LaunchTarget, restart_sec: u64) -> String {
    format!(
        "[Unit]\n\
         Description=PubMed literature push worker\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=simple\n\
         WorkingDirectory={cwd}\n\
         ExecStart={interpreter} {entry}\n\
         Restart=on-failure\n\
         RestartSec={restart_sec}\n\
         StandardOutput=append:{stdout}\n\
         StandardError=append:{stderr}\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        cwd = unit_path(&target.working_directory),
        interpreter = exec_arg(&target.interpreter),
        entry = exec_arg(&target.entry_point),
        stdout = unit_path(&target.stdout_log),
        stderr = unit_path(&target.stderr_log),
    )
}

/// Paths in plain unit settings only need `%` specifiers escaped.
fn unit_path(path: &Path) -> String {
    path.to_string_lossy().replace('%', "%%")
}

/// Double-quoted `ExecStart` word with systemd's C-style escapes.
fn exec_arg(path: &Path) -> String {
    let mut out = String::from("\"");
    for c in path.to_string_lossy().chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '%' => out.push_str("%%"),
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
