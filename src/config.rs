use crate::error::LitpushError;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const CONFIG_FILE_NAME: &str = "litpush.yaml";
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub worker: WorkerConfig,
    pub logs: LogsConfig,
    pub shutdown: ShutdownConfig,
    pub autostart: AutostartConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub venv_dir: String,
    pub entry_point: String,
    pub requirements: String,
    pub base_interpreter: String,
    pub required_modules: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LogsConfig {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    pub signal_file: String,
    pub poll_interval_ms: u64,
    pub poll_attempts: u32,
    pub kill_confirm_ms: u64,
    pub restart_settle_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct AutostartConfig {
    pub launchd_label: String,
    pub startup_script_name: String,
    pub systemd_unit: String,
    pub startup_delay_sec: u64,
    pub restart_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            worker: WorkerConfig::default(),
            logs: LogsConfig::default(),
            shutdown: ShutdownConfig::default(),
            autostart: AutostartConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            venv_dir: ".venv".to_string(),
            entry_point: "main.py".to_string(),
            requirements: "requirements.txt".to_string(),
            base_interpreter: String::new(),
            required_modules: [
                "schedule",
                "yaml",
                "Bio",
                "openai",
                "jinja2",
                "psutil",
                "cryptography",
                "pandas",
            ]
            .iter()
            .map(|name| name.to_string())
            .collect(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            stdout: "pubmed_push_stdout.log".to_string(),
            stderr: "pubmed_push_stderr.log".to_string(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            signal_file: ".stop_signal".to_string(),
            poll_interval_ms: 1_000,
            poll_attempts: 10,
            kill_confirm_ms: 2_000,
            restart_settle_ms: 2_000,
        }
    }
}

impl Default for AutostartConfig {
    fn default() -> Self {
        Self {
            launchd_label: "com.pubmed-literature-push".to_string(),
            startup_script_name: "PubMedLiteraturePush".to_string(),
            systemd_unit: "pubmed-literature-push".to_string(),
            startup_delay_sec: 600,
            restart_sec: 30,
        }
    }
}

/// Poll and settle timings for stop/restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTiming {
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub kill_confirm: Duration,
    pub restart_settle: Duration,
}

impl ShutdownConfig {
    pub fn timing(&self) -> StopTiming {
        StopTiming {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_attempts: self.poll_attempts,
            kill_confirm: Duration::from_millis(self.kill_confirm_ms),
            restart_settle: Duration::from_millis(self.restart_settle_ms),
        }
    }
}

pub fn read_config_from_str(content: &str) -> Result<Config, LitpushError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != CONFIG_VERSION {
        return Err(LitpushError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<Config, LitpushError> {
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

/// Loads the config at `path` if it exists, otherwise the built-in defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config, LitpushError> {
    if path.exists() {
        read_config(path)
    } else {
        Ok(Config::default())
    }
}

fn is_plain_file_name(value: &str) -> bool {
    let path = Path::new(value);
    path.components().count() == 1 && path.file_name().is_some()
}

fn validate_relative(field: &str, value: &str) -> Result<(), LitpushError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LitpushError::Config(format!("{field} must be non-empty")));
    }
    if Path::new(trimmed).is_absolute() {
        return Err(LitpushError::Config(format!(
            "{field} must be relative to the project root"
        )));
    }
    Ok(())
}

pub fn validate_config(cfg: &Config) -> Result<(), LitpushError> {
    validate_relative("worker.venv_dir", &cfg.worker.venv_dir)?;
    validate_relative("worker.entry_point", &cfg.worker.entry_point)?;
    validate_relative("worker.requirements", &cfg.worker.requirements)?;
    validate_relative("logs.stdout", &cfg.logs.stdout)?;
    validate_relative("logs.stderr", &cfg.logs.stderr)?;
    if !is_plain_file_name(&cfg.shutdown.signal_file) {
        return Err(LitpushError::Config(
            "shutdown.signal_file must be a plain file name in the project root".to_string(),
        ));
    }
    if cfg
        .worker
        .required_modules
        .iter()
        .any(|module| module.trim().is_empty() || module.contains(char::is_whitespace))
    {
        return Err(LitpushError::Config(
            "worker.required_modules entries must be non-empty module names".to_string(),
        ));
    }
    if cfg.shutdown.poll_interval_ms == 0 {
        return Err(LitpushError::Config(
            "shutdown.poll_interval_ms must be greater than 0".to_string(),
        ));
    }
    if cfg.shutdown.poll_attempts == 0 {
        return Err(LitpushError::Config(
            "shutdown.poll_attempts must be greater than 0".to_string(),
        ));
    }
    for (field, value) in [
        ("autostart.launchd_label", &cfg.autostart.launchd_label),
        (
            "autostart.startup_script_name",
            &cfg.autostart.startup_script_name,
        ),
        ("autostart.systemd_unit", &cfg.autostart.systemd_unit),
    ] {
        if !is_plain_file_name(value) || value.trim() != value.as_str() {
            return Err(LitpushError::Config(format!(
                "{field} must be a plain name without path separators or surrounding whitespace"
            )));
        }
    }
    Ok(())
}

pub fn resolve_project_root(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return absolutize(path);
    }
    if let Ok(path) = env::var("LITPUSH_PROJECT_ROOT") {
        if !path.trim().is_empty() {
            return absolutize(Path::new(&path));
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn resolve_config_path(override_path: Option<&PathBuf>, project_root: &Path) -> PathBuf {
    if let Some(path) = override_path {
        return absolutize(path);
    }
    if let Ok(path) = env::var("LITPUSH_CONFIG") {
        if !path.trim().is_empty() {
            return absolutize(Path::new(&path));
        }
    }
    project_root.join(CONFIG_FILE_NAME)
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
