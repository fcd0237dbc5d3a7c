use crate::config::Config;
use crate::error::{LitpushError, ProvisionStage};
use crate::platform::HostPlatform;
use crate::probe::find_base_interpreter;
use crate::runner::{render_command, CommandRunner};
use crate::worker::ProjectLayout;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProvisionReport {
    pub env_created: bool,
    pub dependencies_installed: bool,
}

/// Creates the isolated environment if absent, then (re)installs the
/// dependencies into it. A failed stage stops the run and is left in place.
pub fn provision(
    layout: &ProjectLayout,
    cfg: &Config,
    platform: HostPlatform,
    runner: &dyn CommandRunner,
) -> Result<ProvisionReport, LitpushError> {
    let env_created = if layout.interpreter.is_file() {
        tracing::info!(venv = %layout.venv_dir.display(), "isolated environment exists; skipping creation");
        false
    } else {
        create_environment(layout, cfg, platform, runner)?;
        true
    };
    install_dependencies(layout, runner)?;
    Ok(ProvisionReport {
        env_created,
        dependencies_installed: true,
    })
}

fn create_environment(
    layout: &ProjectLayout,
    cfg: &Config,
    platform: HostPlatform,
    runner: &dyn CommandRunner,
) -> Result<(), LitpushError> {
    let stage = ProvisionStage::CreateEnvironment;
    let base = find_base_interpreter(cfg, platform).ok_or_else(|| LitpushError::Provision {
        stage,
        message: format!(
            "no base interpreter found (tried {})",
            platform.base_interpreter_candidates().join(", ")
        ),
        command: None,
        output: String::new(),
    })?;
    let args = vec![
        "-m".to_string(),
        "venv".to_string(),
        layout.venv_dir.to_string_lossy().to_string(),
    ];
    tracing::info!(base = %base.display(), venv = %layout.venv_dir.display(), "creating isolated environment");
    run_stage(stage, &base, &args, &layout.root, runner)?;
    if !layout.interpreter.is_file() {
        return Err(LitpushError::Provision {
            stage,
            message: format!(
                "environment created but interpreter {} is missing",
                layout.interpreter.display()
            ),
            command: Some(render_command(&base, &args)),
            output: String::new(),
        });
    }
    Ok(())
}

fn install_dependencies(
    layout: &ProjectLayout,
    runner: &dyn CommandRunner,
) -> Result<(), LitpushError> {
    let stage = ProvisionStage::InstallDependencies;
    if !layout.requirements.is_file() {
        return Err(LitpushError::Provision {
            stage,
            message: format!(
                "requirements file {} not found",
                layout.requirements.display()
            ),
            command: None,
            output: String::new(),
        });
    }
    let args = vec![
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        "-r".to_string(),
        layout.requirements.to_string_lossy().to_string(),
    ];
    tracing::info!(requirements = %layout.requirements.display(), "installing dependencies");
    run_stage(stage, &layout.interpreter, &args, &layout.root, runner)
}

fn run_stage(
    stage: ProvisionStage,
    program: &Path,
    args: &[String],
    cwd: &Path,
    runner: &dyn CommandRunner,
) -> Result<(), LitpushError> {
    let command = render_command(program, args);
    let output = runner
        .run(program, args, Some(cwd))
        .map_err(|err| LitpushError::Provision {
            stage,
            message: format!("failed to run {}: {err}", program.display()),
            command: Some(command.clone()),
            output: String::new(),
        })?;
    if !output.success() {
        return Err(LitpushError::Provision {
            stage,
            message: format!("`{command}` exited with status {}", output.status_code),
            command: Some(command),
            output: output.combined(),
        });
    }
    Ok(())
}
