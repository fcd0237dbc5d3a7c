//! Host capability set: everything that differs between operating systems
//! sits here so the lifecycle and autostart logic stay single-copy.

use crate::error::LitpushError;
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPlatform {
    Windows,
    MacOs,
    Linux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutostartMechanism {
    StartupFolder,
    Launchd,
    Systemd,
}

impl AutostartMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartupFolder => "startup_folder",
            Self::Launchd => "launchd",
            Self::Systemd => "systemd",
        }
    }
}

impl HostPlatform {
    pub fn current() -> Result<Self, LitpushError> {
        Self::parse(env::consts::OS)
    }

    pub fn parse(os: &str) -> Result<Self, LitpushError> {
        match os {
            "windows" => Ok(Self::Windows),
            "macos" | "darwin" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            other => Err(LitpushError::Config(format!(
                "unsupported host operating system '{other}'; supported: windows, macos, linux"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }

    /// Interpreter location inside the isolated environment.
    pub fn interpreter_subpath(&self) -> PathBuf {
        match self {
            Self::Windows => Path::new("Scripts").join("python.exe"),
            Self::MacOs | Self::Linux => Path::new("bin").join("python"),
        }
    }

    /// Console-less interpreter used for hidden launches, if the platform has one.
    pub fn windowless_interpreter_subpath(&self) -> Option<PathBuf> {
        match self {
            Self::Windows => Some(Path::new("Scripts").join("pythonw.exe")),
            Self::MacOs | Self::Linux => None,
        }
    }

    /// Process names the worker's interpreter may show up under.
    pub fn interpreter_process_names(&self) -> &'static [&'static str] {
        match self {
            Self::Windows => &["python", "pythonw"],
            Self::MacOs | Self::Linux => &["python", "python3"],
        }
    }

    /// Executables tried, in order, when looking for a base interpreter on PATH.
    pub fn base_interpreter_candidates(&self) -> &'static [&'static str] {
        match self {
            Self::Windows => &["python", "py", "python3"],
            Self::MacOs | Self::Linux => &["python3", "python"],
        }
    }

    pub fn paths_case_insensitive(&self) -> bool {
        matches!(self, Self::Windows)
    }

    pub fn autostart_mechanism(&self) -> AutostartMechanism {
        match self {
            Self::Windows => AutostartMechanism::StartupFolder,
            Self::MacOs => AutostartMechanism::Launchd,
            Self::Linux => AutostartMechanism::Systemd,
        }
    }

    /// Per-user directory holding the autostart artifact.
    ///
    /// `LITPUSH_AUTOSTART_DIR` overrides the native location.
    pub fn autostart_dir(&self) -> Result<PathBuf, LitpushError> {
        if let Ok(path) = env::var("LITPUSH_AUTOSTART_DIR") {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        match self {
            Self::Windows => {
                let roaming = dirs::config_dir().ok_or_else(|| {
                    LitpushError::Config("unable to resolve the roaming AppData directory".to_string())
                })?;
                Ok(roaming
                    .join("Microsoft")
                    .join("Windows")
                    .join("Start Menu")
                    .join("Programs")
                    .join("Startup"))
            }
            Self::MacOs => Ok(required_home_dir()?.join("Library").join("LaunchAgents")),
            Self::Linux => Ok(required_home_dir()?
                .join(".config")
                .join("systemd")
                .join("user")),
        }
    }
}

fn required_home_dir() -> Result<PathBuf, LitpushError> {
    let home = dirs::home_dir().ok_or_else(|| {
        LitpushError::Config("unable to resolve $HOME; set HOME to an existing directory".to_string())
    })?;
    if !home.is_absolute() {
        return Err(LitpushError::Config(format!(
            "resolved HOME path is not absolute: {}",
            home.display()
        )));
    }
    Ok(home)
}
