use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LitpushError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("environment not ready: missing {}", .missing.join(", "))]
    EnvironmentNotReady { missing: Vec<String> },
    #[error("provision failed during {stage}: {message}")]
    Provision {
        stage: ProvisionStage,
        message: String,
        command: Option<String>,
        output: String,
    },
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to terminate worker pid {pid}: {message}")]
    Terminate { pid: u32, message: String },
    #[error("autostart ({mechanism}) error: {message}")]
    Autostart {
        mechanism: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStage {
    CreateEnvironment,
    InstallDependencies,
}

impl ProvisionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateEnvironment => "create-environment",
            Self::InstallDependencies => "install-dependencies",
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetails {
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl LitpushError {
    pub fn autostart(mechanism: &'static str, message: impl Into<String>) -> Self {
        Self::Autostart {
            mechanism,
            message: message.into(),
        }
    }

    /// Structured details for the `--json` error envelope.
    pub fn details(&self) -> Option<ErrorDetails> {
        match self {
            Self::EnvironmentNotReady { .. } => Some(ErrorDetails {
                error_code: "environment_not_ready".to_string(),
                hint: Some("Run `litpush setup` to create the environment and install dependencies.".to_string()),
                command: None,
                raw_output: None,
            }),
            Self::Provision {
                stage,
                command,
                output,
                ..
            } => Some(ErrorDetails {
                error_code: format!("provision_{}", stage.as_str().replace('-', "_")),
                hint: None,
                command: command.clone(),
                raw_output: if output.trim().is_empty() {
                    None
                } else {
                    Some(output.clone())
                },
            }),
            Self::Launch { program, .. } => Some(ErrorDetails {
                error_code: "launch_failed".to_string(),
                hint: None,
                command: Some(program.clone()),
                raw_output: None,
            }),
            Self::Terminate { .. } => Some(ErrorDetails {
                error_code: "terminate_failed".to_string(),
                hint: Some("Check permissions on the worker process and retry `litpush stop`.".to_string()),
                command: None,
                raw_output: None,
            }),
            Self::Autostart { mechanism, .. } => Some(ErrorDetails {
                error_code: format!("autostart_{mechanism}"),
                hint: None,
                command: None,
                raw_output: None,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_not_ready_lists_every_missing_element() {
        let err = LitpushError::EnvironmentNotReady {
            missing: vec!["isolated environment".to_string(), "main.py".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "environment not ready: missing isolated environment, main.py"
        );
        assert_eq!(err.details().unwrap().error_code, "environment_not_ready");
    }

    #[test]
    fn provision_details_carry_stage_and_output() {
        let err = LitpushError::Provision {
            stage: ProvisionStage::InstallDependencies,
            message: "pip exited with status 1".to_string(),
            command: Some("python -m pip install -r requirements.txt".to_string()),
            output: "ERROR: No matching distribution".to_string(),
        };
        assert!(err.to_string().contains("install-dependencies"));
        let details = err.details().unwrap();
        assert_eq!(details.error_code, "provision_install_dependencies");
        assert_eq!(
            details.raw_output.as_deref(),
            Some("ERROR: No matching distribution")
        );
    }

    #[test]
    fn ambient_errors_have_no_details() {
        let err = LitpushError::Config("bad".to_string());
        assert!(err.details().is_none());
    }
}
