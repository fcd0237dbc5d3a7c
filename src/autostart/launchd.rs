use super::{run_supervisor, AutostartBackend, LaunchTarget};
use crate::error::LitpushError;
use crate::platform::AutostartMechanism;
use crate::runner::CommandRunner;
use std::path::{Path, PathBuf};

const LAUNCHCTL: &str = "launchctl";

/// `launchctl unload` output meaning the agent was not loaded.
const NOT_LOADED: [&str; 2] = ["Could not find specified service", "No such process"];

/// Per-user launch agent under `~/Library/LaunchAgents`.
pub struct Launchd {
    dir: PathBuf,
    label: String,
}

impl Launchd {
    pub fn new(dir: PathBuf, label: &str) -> Self {
        Self {
            dir,
            label: label.to_string(),
        }
    }

    fn plist_arg(&self) -> String {
        self.artifact_path().to_string_lossy().to_string()
    }
}

impl AutostartBackend for Launchd {
    fn mechanism(&self) -> AutostartMechanism {
        AutostartMechanism::Launchd
    }

    fn artifact_path(&self) -> PathBuf {
        self.dir.join(format!("{}.plist", self.label))
    }

    fn render(&self, target: &LaunchTarget) -> String {
        generate_plist(&self.label, target)
    }

    fn register(&self, runner: &dyn CommandRunner) -> Result<bool, LitpushError> {
        let plist = self.plist_arg();
        // A stale registration makes `load` fail; clear it first.
        if let Err(message) = run_supervisor(runner, LAUNCHCTL, &["unload", plist.as_str()]) {
            tracing::debug!(%message, "no previous launch agent to unload");
        }
        run_supervisor(runner, LAUNCHCTL, &["load", "-w", plist.as_str()]).map_err(|message| {
            LitpushError::autostart(AutostartMechanism::Launchd.as_str(), message)
        })?;
        tracing::info!(label = %self.label, "launch agent loaded");
        Ok(true)
    }

    fn deregister(&self, runner: &dyn CommandRunner) -> Result<bool, String> {
        let plist = self.plist_arg();
        match run_supervisor(runner, LAUNCHCTL, &["unload", "-w", plist.as_str()]) {
            Ok(()) => Ok(true),
            Err(message) if NOT_LOADED.iter().any(|needle| message.contains(needle)) => {
                tracing::debug!(%message, "launch agent was not loaded");
                Ok(false)
            }
            Err(message) => Err(message),
        }
    }
}

pub fn generate_plist(label: &str, target: &LaunchTarget) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{interpreter}</string>
        <string>{entry}</string>
    </array>
    <key>WorkingDirectory</key>
    <string>{cwd}</string>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>StandardOutPath</key>
    <string>{stdout}</string>
    <key>StandardErrorPath</key>
    <string>{stderr}</string>
</dict>
</plist>
"#,
        label = xml_escape(label),
        interpreter = xml_path(&target.interpreter),
        entry = xml_path(&target.entry_point),
        cwd = xml_path(&target.working_directory),
        stdout = xml_path(&target.stdout_log),
        stderr = xml_path(&target.stderr_log),
    )
}

fn xml_path(path: &Path) -> String {
    xml_escape(&path.to_string_lossy())
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
