//! Finds the OS process running the worker. The process table is the only
//! source of truth; nothing here is cached between calls.

use crate::platform::HostPlatform;
use crate::worker::WorkerDescriptor;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::OsString;
use std::path::Path;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub command_line: String,
    pub started_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessLocator {
    platform: HostPlatform,
}

impl ProcessLocator {
    pub fn new(platform: HostPlatform) -> Self {
        Self { platform }
    }

    /// First process whose interpreter matches and whose command line names
    /// the entry point. Several matches are not disambiguated.
    pub fn locate(&self, descriptor: &WorkerDescriptor) -> Option<ProcessHandle> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_exe(UpdateKind::OnlyIfNotSet),
        );
        let own_pid = Pid::from_u32(std::process::id());
        let mut candidates: Vec<_> = system
            .processes()
            .iter()
            .filter(|(pid, _)| **pid != own_pid)
            .collect();
        candidates.sort_by_key(|(pid, _)| pid.as_u32());

        for (pid, process) in candidates {
            if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                continue;
            }
            let argv0 = process.cmd().first().map(|arg| Path::new(arg.as_os_str()));
            if !self.interpreter_matches(
                &process.name().to_string_lossy(),
                process.exe(),
                argv0,
                &descriptor.interpreter_path,
            ) {
                continue;
            }
            let command_line = join_command_line(process.cmd());
            if command_line.is_empty()
                || !self.command_line_matches(&command_line, &descriptor.entry_point_path)
            {
                continue;
            }
            let handle = ProcessHandle {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                command_line,
                started_at: DateTime::<Utc>::from_timestamp(process.start_time() as i64, 0)
                    .map(|ts| ts.to_rfc3339()),
            };
            tracing::debug!(pid = handle.pid, cmd = %handle.command_line, "located worker process");
            return Some(handle);
        }
        None
    }

    /// Whether the process name, executable or `argv[0]` looks like the
    /// descriptor's interpreter.
    pub fn interpreter_matches(
        &self,
        process_name: &str,
        exe: Option<&Path>,
        argv0: Option<&Path>,
        interpreter: &Path,
    ) -> bool {
        let expected = interpreter
            .file_name()
            .map(|name| normalize_program_name(&name.to_string_lossy()))
            .unwrap_or_default();
        let accepted = |candidate: &str| {
            let candidate = normalize_program_name(candidate);
            if candidate.is_empty() {
                return false;
            }
            if candidate == expected {
                return true;
            }
            self.platform
                .interpreter_process_names()
                .iter()
                .any(|alias| is_versioned_alias(&candidate, alias))
        };
        if accepted(process_name) {
            return true;
        }
        [exe, argv0]
            .into_iter()
            .flatten()
            .filter_map(|path| path.file_name())
            .any(|name| accepted(&name.to_string_lossy()))
    }

    pub fn command_line_matches(&self, command_line: &str, entry_point: &Path) -> bool {
        let haystack = normalize_separators(command_line);
        let needle = normalize_separators(&entry_point.to_string_lossy());
        if needle.is_empty() {
            return false;
        }
        if self.platform.paths_case_insensitive() {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        } else {
            haystack.contains(&needle)
        }
    }
}

/// Sends a forced kill to `pid`. Returns `Ok(false)` when the process is
/// already gone.
pub fn force_kill(pid: u32) -> Result<bool, String> {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::nothing(),
    );
    let Some(process) = system.process(target) else {
        return Ok(false);
    };
    if process.kill() {
        Ok(true)
    } else {
        Err("the operating system refused the kill request".to_string())
    }
}

/// Whether `pid` is still present and not a zombie.
pub fn pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    let target = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(target)
        .map(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

fn join_command_line(cmd: &[OsString]) -> String {
    cmd.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_program_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

/// `python3.12` counts as `python3`; `python3` counts as `python`.
fn is_versioned_alias(candidate: &str, alias: &str) -> bool {
    match candidate.strip_prefix(alias) {
        Some(rest) => rest.chars().all(|c| c.is_ascii_digit() || c == '.'),
        None => false,
    }
}

fn normalize_separators(value: &str) -> String {
    value.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn interpreter_matches_names_and_versioned_aliases() {
        let locator = ProcessLocator::new(HostPlatform::Linux);
        let interpreter = PathBuf::from("/srv/push/.venv/bin/python");
        assert!(locator.interpreter_matches("python", None, None, &interpreter));
        assert!(locator.interpreter_matches("python3.12", None, None, &interpreter));
        assert!(locator.interpreter_matches("Python", None, None, &interpreter));
        assert!(!locator.interpreter_matches("bash", None, None, &interpreter));
        assert!(!locator.interpreter_matches("pythonista", None, None, &interpreter));
    }

    #[test]
    fn interpreter_matches_through_exe_or_argv0() {
        let locator = ProcessLocator::new(HostPlatform::Linux);
        let interpreter = PathBuf::from("/srv/push/.venv/bin/python");
        assert!(locator.interpreter_matches(
            "exe",
            Some(Path::new("/usr/lib/python3.11/bin/python3.11")),
            None,
            &interpreter
        ));
        assert!(locator.interpreter_matches(
            "",
            None,
            Some(Path::new("/srv/push/.venv/bin/python")),
            &interpreter
        ));
    }

    #[test]
    fn windows_names_strip_exe_and_accept_pythonw() {
        let locator = ProcessLocator::new(HostPlatform::Windows);
        let interpreter = PathBuf::from(r"C:\push\.venv\Scripts\python.exe");
        assert!(locator.interpreter_matches("python.exe", None, None, &interpreter));
        assert!(locator.interpreter_matches("pythonw.exe", None, None, &interpreter));
        assert!(!locator.interpreter_matches("powershell.exe", None, None, &interpreter));
    }

    #[test]
    fn command_line_must_contain_entry_point() {
        let locator = ProcessLocator::new(HostPlatform::Linux);
        let entry = PathBuf::from("/srv/push/main.py");
        assert!(locator.command_line_matches(
            "/srv/push/.venv/bin/python /srv/push/main.py",
            &entry
        ));
        assert!(!locator.command_line_matches(
            "/srv/other/.venv/bin/python /srv/other/main.py",
            &entry
        ));
        assert!(!locator.command_line_matches(
            "/srv/push/.venv/bin/python /srv/push/MAIN.py",
            &entry
        ));
    }

    #[test]
    fn windows_command_lines_ignore_case_and_separators() {
        let locator = ProcessLocator::new(HostPlatform::Windows);
        let entry = PathBuf::from(r"C:\Push\main.py");
        assert!(locator.command_line_matches(
            r"c:\push\.venv\Scripts\pythonw.exe C:/push/MAIN.py",
            &entry
        ));
    }

    #[test]
    fn locate_returns_none_for_unknown_entry_point() {
        let locator = ProcessLocator::new(HostPlatform::Linux);
        let descriptor = WorkerDescriptor {
            entry_point_path: PathBuf::from("/nonexistent/litpush-test/main.py"),
            interpreter_path: PathBuf::from("/nonexistent/litpush-test/.venv/bin/python"),
            working_directory: PathBuf::from("/nonexistent/litpush-test"),
        };
        assert!(locator.locate(&descriptor).is_none());
    }

    #[test]
    fn own_pid_is_alive_and_kill_of_missing_pid_reports_gone() {
        assert!(pid_alive(std::process::id()));
        // Pid near the top of the range; vanishingly unlikely to exist.
        assert_eq!(force_kill(4_194_000), Ok(false));
    }
}
