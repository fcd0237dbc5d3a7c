use crate::config::Config;
use crate::platform::HostPlatform;
use crate::runner::CommandRunner;
use crate::worker::ProjectLayout;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Asks the environment interpreter which of the given modules it cannot
/// find, one per line. `find_spec` locates without importing.
const FIND_MISSING_MODULES_PY: &str = "\
import importlib.util, sys
for name in sys.argv[1:]:
    try:
        spec = importlib.util.find_spec(name)
    except Exception:
        spec = None
    if spec is None:
        print(name)
";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModuleStatus {
    pub name: String,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub base_interpreter: Option<PathBuf>,
    pub interpreter_present: bool,
    pub isolated_env_present: bool,
    pub entry_point_present: bool,
    pub required_modules_present: Vec<ModuleStatus>,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub id: &'static str,
    pub ok: bool,
    pub message: String,
    pub remediation: &'static str,
}

impl ReadinessReport {
    pub fn ready(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_modules(&self) -> Vec<&str> {
        self.required_modules_present
            .iter()
            .filter(|module| !module.present)
            .map(|module| module.name.as_str())
            .collect()
    }

    pub fn checks(&self) -> Vec<ReadinessCheck> {
        let missing_modules = self.missing_modules();
        vec![
            ReadinessCheck {
                id: "base_interpreter",
                ok: self.interpreter_present || self.isolated_env_present,
                message: match &self.base_interpreter {
                    Some(path) => format!("base interpreter found at {}", path.display()),
                    None if self.isolated_env_present => {
                        "no base interpreter on PATH (only needed to create the isolated environment)"
                            .to_string()
                    }
                    None => "no base interpreter found on PATH".to_string(),
                },
                remediation: "Install Python 3 or set worker.base_interpreter in litpush.yaml.",
            },
            ReadinessCheck {
                id: "isolated_environment",
                ok: self.isolated_env_present,
                message: if self.isolated_env_present {
                    "isolated environment present".to_string()
                } else {
                    "isolated environment missing".to_string()
                },
                remediation: "Run `litpush setup` to create it.",
            },
            ReadinessCheck {
                id: "entry_point",
                ok: self.entry_point_present,
                message: if self.entry_point_present {
                    "worker entry point present".to_string()
                } else {
                    "worker entry point missing".to_string()
                },
                remediation: "Run litpush from the worker's project root or pass --project-root.",
            },
            ReadinessCheck {
                id: "required_modules",
                ok: missing_modules.is_empty(),
                message: if missing_modules.is_empty() {
                    format!(
                        "all {} required modules importable",
                        self.required_modules_present.len()
                    )
                } else {
                    format!("missing modules: {}", missing_modules.join(", "))
                },
                remediation: "Run `litpush setup` to install dependencies.",
            },
        ]
    }
}

/// Finds the interpreter used to create the isolated environment.
pub fn find_base_interpreter(cfg: &Config, platform: HostPlatform) -> Option<PathBuf> {
    let configured = cfg.worker.base_interpreter.trim();
    if !configured.is_empty() {
        let path = Path::new(configured);
        if path.components().count() > 1 {
            return path.is_file().then(|| path.to_path_buf());
        }
        return which::which(configured).ok();
    }
    platform
        .base_interpreter_candidates()
        .iter()
        .find_map(|candidate| which::which(candidate).ok())
}

/// Read-only readiness check. Never mutates the project.
pub fn probe(
    layout: &ProjectLayout,
    cfg: &Config,
    platform: HostPlatform,
    runner: &dyn CommandRunner,
) -> ReadinessReport {
    let base_interpreter = find_base_interpreter(cfg, platform);
    let interpreter_present = base_interpreter.is_some();
    let isolated_env_present = layout.venv_dir.is_dir() && layout.interpreter.is_file();
    let entry_point_present = layout.entry_point.is_file();

    let required = &cfg.worker.required_modules;
    let absent_modules: Vec<String> = if !isolated_env_present {
        required.clone()
    } else if required.is_empty() {
        Vec::new()
    } else {
        query_missing_modules(layout, required, runner)
    };
    let required_modules_present: Vec<ModuleStatus> = required
        .iter()
        .map(|name| ModuleStatus {
            name: name.clone(),
            present: !absent_modules.contains(name),
        })
        .collect();

    let mut missing = Vec::new();
    // An existing environment runs the worker without the interpreter that built it.
    if !interpreter_present && !isolated_env_present {
        missing.push("base interpreter".to_string());
    }
    if !isolated_env_present {
        missing.push("isolated environment".to_string());
    }
    if !entry_point_present {
        missing.push(format!("entry point ({})", layout.entry_point.display()));
    }
    for module in required_modules_present.iter().filter(|m| !m.present) {
        missing.push(format!("module {}", module.name));
    }

    let report = ReadinessReport {
        base_interpreter,
        interpreter_present,
        isolated_env_present,
        entry_point_present,
        required_modules_present,
        missing,
    };
    tracing::debug!(ready = report.ready(), missing = ?report.missing, "environment probed");
    report
}

/// Any failure to ask counts every module as missing.
fn query_missing_modules(
    layout: &ProjectLayout,
    modules: &[String],
    runner: &dyn CommandRunner,
) -> Vec<String> {
    let mut args = vec!["-c".to_string(), FIND_MISSING_MODULES_PY.to_string()];
    args.extend(modules.iter().cloned());
    match runner.run(&layout.interpreter, &args, Some(&layout.root)) {
        Ok(output) if output.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        }
        Ok(output) => {
            tracing::warn!(
                status = output.status_code,
                output = %output.combined(),
                "module probe exited unsuccessfully"
            );
            modules.to_vec()
        }
        Err(err) => {
            tracing::warn!(error = %err, "module probe could not run the environment interpreter");
            modules.to_vec()
        }
    }
}
