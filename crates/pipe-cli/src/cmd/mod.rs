use anyhow::Context;
use clap::Args;
use pipe_core::config::{Mode, PipeConfig};
use std::path::Path;

pub mod classify;
pub mod mcp;
pub mod prepare;
pub mod run;

/// Command-line values that win over the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct Overrides {
    /// Execution mode: tag, agent or review (overrides MODE)
    #[arg(long)]
    pub mode: Option<String>,

    /// Model identifier (overrides MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Minutes before the assistant is terminated (overrides TIMEOUT_MINUTES)
    #[arg(long)]
    pub timeout_minutes: Option<u32>,
}

/// Load the pipe configuration from the environment and apply overrides.
///
/// `require_auth` is false for dry runs, which only need repository
/// coordinates.
pub fn load_config(
    repo_path: Option<&Path>,
    overrides: &Overrides,
    require_auth: bool,
) -> anyhow::Result<PipeConfig> {
    let mut config = PipeConfig::from_env().context("invalid pipe configuration")?;

    if let Some(path) = repo_path {
        config.repo_path = path.to_path_buf();
    }
    if let Some(mode) = &overrides.mode {
        config.mode = mode.parse::<Mode>()?;
    }
    if let Some(model) = &overrides.model {
        config.model = model.clone();
    }
    if let Some(minutes) = overrides.timeout_minutes {
        anyhow::ensure!(minutes > 0, "--timeout-minutes must be positive");
        config.timeout_minutes = minutes;
    }

    if require_auth {
        config.validate().context("invalid pipe configuration")?;
    } else {
        config.host.validate().context("invalid pipe configuration")?;
    }

    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}
