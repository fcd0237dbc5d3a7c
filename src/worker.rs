use crate::config::Config;
use crate::error::LitpushError;
use crate::platform::HostPlatform;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Every filesystem location the controller touches inside the project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectLayout {
    pub root: PathBuf,
    pub venv_dir: PathBuf,
    pub interpreter: PathBuf,
    pub windowless_interpreter: Option<PathBuf>,
    pub entry_point: PathBuf,
    pub requirements: PathBuf,
    pub signal_file: PathBuf,
    pub stdout_log: PathBuf,
    pub stderr_log: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: &Path, cfg: &Config, platform: HostPlatform) -> Self {
        let venv_dir = root.join(&cfg.worker.venv_dir);
        Self {
            root: root.to_path_buf(),
            interpreter: venv_dir.join(platform.interpreter_subpath()),
            windowless_interpreter: platform
                .windowless_interpreter_subpath()
                .map(|sub| venv_dir.join(sub)),
            venv_dir,
            entry_point: root.join(&cfg.worker.entry_point),
            requirements: root.join(&cfg.worker.requirements),
            signal_file: root.join(&cfg.shutdown.signal_file),
            stdout_log: root.join(&cfg.logs.stdout),
            stderr_log: root.join(&cfg.logs.stderr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerDescriptor {
    pub entry_point_path: PathBuf,
    pub interpreter_path: PathBuf,
    pub working_directory: PathBuf,
}

impl WorkerDescriptor {
    /// The descriptor the layout implies, whether or not it exists on disk.
    /// Used for locating a worker that may outlive its environment.
    pub fn expected(layout: &ProjectLayout) -> Self {
        Self {
            entry_point_path: layout.entry_point.clone(),
            interpreter_path: layout.interpreter.clone(),
            working_directory: layout.root.clone(),
        }
    }

    pub fn resolve(layout: &ProjectLayout) -> Result<Self, LitpushError> {
        let mut missing = Vec::new();
        if !layout.venv_dir.is_dir() {
            missing.push(format!(
                "isolated environment ({})",
                layout.venv_dir.display()
            ));
        }
        if !layout.interpreter.is_file() {
            missing.push(format!("interpreter ({})", layout.interpreter.display()));
        }
        if !layout.entry_point.is_file() {
            missing.push(format!("entry point ({})", layout.entry_point.display()));
        }
        if !missing.is_empty() {
            return Err(LitpushError::EnvironmentNotReady { missing });
        }
        Ok(Self::expected(layout))
    }

    /// Interpreter for hidden launches: the console-less sibling when the
    /// environment ships one.
    pub fn windowless_interpreter(&self, layout: &ProjectLayout) -> PathBuf {
        layout
            .windowless_interpreter
            .as_ref()
            .filter(|path| path.is_file())
            .cloned()
            .unwrap_or_else(|| self.interpreter_path.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn layout_places_everything_under_the_root() {
        let root = PathBuf::from("/srv/push");
        let layout = ProjectLayout::new(&root, &Config::default(), HostPlatform::Linux);
        assert_eq!(layout.interpreter, root.join(".venv").join("bin").join("python"));
        assert_eq!(layout.entry_point, root.join("main.py"));
        assert_eq!(layout.signal_file, root.join(".stop_signal"));
        assert_eq!(layout.stdout_log, root.join("pubmed_push_stdout.log"));
        assert!(layout.windowless_interpreter.is_none());
    }

    #[test]
    fn resolve_reports_every_missing_element() {
        let dir = tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path(), &Config::default(), HostPlatform::Linux);
        let err = WorkerDescriptor::resolve(&layout).expect_err("empty project");
        match err {
            LitpushError::EnvironmentNotReady { missing } => {
                assert_eq!(missing.len(), 3);
                assert!(missing[0].starts_with("isolated environment"));
                assert!(missing[1].starts_with("interpreter"));
                assert!(missing[2].starts_with("entry point"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolve_succeeds_for_complete_project() {
        let dir = tempdir().unwrap();
        let layout = testing::fake_project(dir.path(), HostPlatform::Linux);
        let descriptor = WorkerDescriptor::resolve(&layout).expect("resolves");
        assert_eq!(descriptor, WorkerDescriptor::expected(&layout));
        assert_eq!(descriptor.working_directory, dir.path());
    }

    #[test]
    fn windowless_interpreter_prefers_sibling_when_present() {
        let dir = tempdir().unwrap();
        let layout = testing::fake_project(dir.path(), HostPlatform::Windows);
        let descriptor = WorkerDescriptor::resolve(&layout).unwrap();
        assert_eq!(descriptor.windowless_interpreter(&layout), layout.interpreter);

        let pythonw = layout.windowless_interpreter.clone().unwrap();
        fs::write(&pythonw, "").unwrap();
        assert_eq!(descriptor.windowless_interpreter(&layout), pythonw);
    }
}
