//! Configuration module
//!
//! Global CLI flags layered over the `JAGUAR_*` environment configuration.

use anyhow::{Context, Result};
use clap::Args;
use jaguar_runner::Config;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime overrides shared by every command
#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    /// Path to the simulator executable
    #[arg(long, global = true, env = "JAGUAR_SIMULATOR")]
    pub simulator: Option<PathBuf>,

    /// Path of the Graphviz `dot` executable
    #[arg(long, global = true, env = "JAGUAR_RENDERER")]
    pub renderer: Option<PathBuf>,

    /// Directory under which job workspaces are created
    #[arg(long, global = true, env = "JAGUAR_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Max simulations running at once
    #[arg(long, global = true, env = "JAGUAR_MAX_RUNNING")]
    pub max_running: Option<usize>,

    /// Simulator wall-clock limit in seconds
    #[arg(long, global = true, env = "JAGUAR_JOB_TIMEOUT")]
    pub timeout: Option<u64>,
}

impl RuntimeArgs {
    /// Builds the effective service configuration
    ///
    /// Starts from [`Config::from_env`] and applies the flags on top.
    pub fn load(&self) -> Result<Config> {
        let mut config = Config::from_env().context("Failed to read JAGUAR_* environment")?;

        if let Some(simulator) = &self.simulator {
            config.simulator_path = simulator.clone();
        }
        if let Some(renderer) = &self.renderer {
            config.renderer_path = renderer.clone();
        }
        if let Some(root) = &self.workspace_root {
            config.workspace_root = root.clone();
        }
        if let Some(max_running) = self.max_running {
            config = config.with_max_running_jobs(max_running);
            config.max_workspaces = config.max_workspaces.max(max_running);
        }
        if let Some(secs) = self.timeout {
            config = config.with_job_timeout(Duration::from_secs(secs));
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
