use super::{AutostartBackend, LaunchTarget};
use crate::platform::AutostartMechanism;
use std::path::PathBuf;

/// Windows Script Host script in the per-user Startup folder. Nothing is
/// registered; the shell runs everything in that folder at logon.
pub struct StartupFolder {
    dir: PathBuf,
    script_name: String,
    delay_sec: u64,
}

impl StartupFolder {
    pub fn new(dir: PathBuf, script_name: &str, delay_sec: u64) -> Self {
        Self {
            dir,
            script_name: script_name.to_string(),
            delay_sec,
        }
    }
}

impl AutostartBackend for StartupFolder {
    fn mechanism(&self) -> AutostartMechanism {
        AutostartMechanism::StartupFolder
    }

    fn artifact_path(&self) -> PathBuf {
        self.dir.join(format!("{}.vbs", self.script_name))
    }

    fn superseded_artifacts(&self) -> Vec<PathBuf> {
        vec![self.dir.join(format!("{}.bat", self.script_name))]
    }

    fn render(&self, target: &LaunchTarget) -> String {
        let command = format!(
            "\"{}\" \"{}\"",
            target.windowless_interpreter.display(),
            target.entry_point.display()
        );
        format!(
            "' Starts the literature push worker after logon. Managed by litpush.\r\n\
             Option Explicit\r\n\
             Dim shell\r\n\
             WScript.Sleep {delay_ms}\r\n\
             Set shell = CreateObject(\"WScript.Shell\")\r\n\
             shell.CurrentDirectory = {cwd}\r\n\
             shell.Run {command}, 0, False\r\n",
            delay_ms = self.delay_sec.saturating_mul(1000),
            cwd = vbs_string(&target.working_directory.display().to_string()),
            command = vbs_string(&command),
        )
    }
}

/// VBScript string literal; embedded quotes are doubled.
fn vbs_string(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autostart::AutostartRegistrar;
    use crate::runner::testing::MockRunner;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn windows_target() -> LaunchTarget {
        LaunchTarget {
            interpreter: PathBuf::from(r"C:\push\.venv\Scripts\python.exe"),
            windowless_interpreter: PathBuf::from(r"C:\push\.venv\Scripts\pythonw.exe"),
            entry_point: PathBuf::from(r"C:\push\main.py"),
            working_directory: PathBuf::from(r"C:\push"),
            stdout_log: PathBuf::from(r"C:\push\pubmed_push_stdout.log"),
            stderr_log: PathBuf::from(r"C:\push\pubmed_push_stderr.log"),
        }
    }

    #[test]
    fn script_delays_then_runs_hidden_windowless_interpreter() {
        let backend = StartupFolder::new(PathBuf::from("Startup"), "PubMedLiteraturePush", 600);
        let script = backend.render(&windows_target());

        assert!(script.contains("WScript.Sleep 600000\r\n"));
        assert!(script.contains("shell.CurrentDirectory = \"C:\\push\"\r\n"));
        assert!(script.contains(
            "shell.Run \"\"\"C:\\push\\.venv\\Scripts\\pythonw.exe\"\" \"\"C:\\push\\main.py\"\"\", 0, False"
        ));
        assert!(!script.contains("python.exe"));
    }

    #[test]
    fn artifact_names_follow_script_name() {
        let backend = StartupFolder::new(PathBuf::from("Startup"), "PubMedLiteraturePush", 600);
        assert_eq!(
            backend.artifact_path(),
            Path::new("Startup").join("PubMedLiteraturePush.vbs")
        );
        assert_eq!(
            backend.superseded_artifacts(),
            vec![Path::new("Startup").join("PubMedLiteraturePush.bat")]
        );
    }

    #[test]
    fn enable_and_disable_clear_legacy_batch_file() {
        let dir = tempdir().unwrap();
        let legacy = dir.path().join("PubMedLiteraturePush.bat");
        fs::write(&legacy, "@echo off\r\n").unwrap();
        let runner = MockRunner::default();
        let registrar = AutostartRegistrar::new(
            Box::new(StartupFolder::new(dir.path().to_path_buf(), "PubMedLiteraturePush", 5)),
            &runner,
        );

        let enabled = registrar.enable(&windows_target()).unwrap();
        assert_eq!(enabled.removed_legacy, vec![legacy.clone()]);
        assert!(!legacy.exists());
        assert!(dir.path().join("PubMedLiteraturePush.vbs").is_file());

        let again = registrar.enable(&windows_target()).unwrap();
        assert!(again.removed_legacy.is_empty());

        fs::write(&legacy, "@echo off\r\n").unwrap();
        let disabled = registrar.disable().unwrap();
        assert!(disabled.removed);
        assert_eq!(disabled.removed_legacy, vec![legacy.clone()]);
        assert!(!legacy.exists());
        assert!(!dir.path().join("PubMedLiteraturePush.vbs").exists());
    }

    #[test]
    fn legacy_batch_file_alone_counts_as_enabled() {
        let dir = tempdir().unwrap();
        let legacy = dir.path().join("PubMedLiteraturePush.bat");
        fs::write(&legacy, "@echo off\r\n").unwrap();
        let runner = MockRunner::default();
        let registrar = AutostartRegistrar::new(
            Box::new(StartupFolder::new(dir.path().to_path_buf(), "PubMedLiteraturePush", 5)),
            &runner,
        );

        assert!(registrar.is_enabled());

        let disabled = registrar.disable().unwrap();
        assert!(!disabled.removed);
        assert_eq!(disabled.removed_legacy, vec![legacy]);
        assert!(!registrar.is_enabled());
    }
}
