//! Service configuration
//!
//! Defines every tunable of the simulation service: concurrency, timeouts,
//! output caps, workspace retention and placement, and rendering.

use jaguar_core::domain::artifact::RenderFormat;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Host variables passed to spawned processes when no allowlist is configured
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "LANG", "LC_ALL", "TZ"];

/// Service configuration
///
/// All timeouts and limits are configurable to allow tuning for different
/// deployments (a laptop vs a shared server running many simulations).
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the simulator executable
    pub simulator_path: PathBuf,

    /// Path (or PATH-resolved name) of the Graphviz `dot` executable
    pub renderer_path: PathBuf,

    /// Directory under which per-job workspaces are created
    pub workspace_root: PathBuf,

    /// Base name shared by the simulator's input and output files
    pub model_stem: String,

    /// Max jobs in `Running` at once
    pub max_running_jobs: usize,

    /// Wall-clock limit for one simulator run
    pub job_timeout: Duration,

    /// Wall-clock limit for one renderer invocation
    pub render_timeout: Duration,

    /// Time between SIGTERM and SIGKILL when terminating a process
    pub kill_grace: Duration,

    /// Combined stdout+stderr bytes kept per process
    pub output_byte_cap: usize,

    /// How long terminal jobs keep their workspace
    pub retention: Duration,

    /// How often the retention sweep runs
    pub sweep_interval: Duration,

    /// Default artifact format
    pub render_format: RenderFormat,

    /// Render failed runs best-effort (flagged partial, diagnostics only)
    pub render_partial: bool,

    /// Max workspaces present on disk at once
    pub max_workspaces: usize,

    /// Allocation fails when the workspace filesystem has less free space
    pub min_free_bytes: u64,

    /// Allocation fails when the workspace filesystem has fewer free inodes
    pub min_free_inodes: u64,

    /// Host environment variables forwarded to spawned processes
    pub env_allowlist: Vec<String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(simulator_path: PathBuf, workspace_root: PathBuf) -> Self {
        Self {
            simulator_path,
            renderer_path: PathBuf::from("dot"),
            workspace_root,
            model_stem: "system".to_string(),
            max_running_jobs: 2,
            job_timeout: Duration::from_secs(300), // 5 minutes
            render_timeout: Duration::from_secs(60),
            kill_grace: Duration::from_secs(5),
            output_byte_cap: 1024 * 1024,
            retention: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            render_format: RenderFormat::Svg,
            render_partial: false,
            max_workspaces: 256,
            min_free_bytes: 64 * 1024 * 1024,
            min_free_inodes: 1024,
            env_allowlist: DEFAULT_ENV_ALLOWLIST
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - JAGUAR_SIMULATOR (default: bin/simFDS)
    /// - JAGUAR_RENDERER (default: dot)
    /// - JAGUAR_WORKSPACE_ROOT (default: <tmp>/jaguar)
    /// - JAGUAR_MODEL_STEM (default: system)
    /// - JAGUAR_MAX_RUNNING (default: 2)
    /// - JAGUAR_JOB_TIMEOUT (seconds, default: 300)
    /// - JAGUAR_RENDER_TIMEOUT (seconds, default: 60)
    /// - JAGUAR_KILL_GRACE (milliseconds, default: 5000)
    /// - JAGUAR_OUTPUT_CAP (bytes, default: 1 MiB)
    /// - JAGUAR_RETENTION (seconds, default: 3600)
    /// - JAGUAR_SWEEP_INTERVAL (seconds, default: 60)
    /// - JAGUAR_RENDER_FORMAT (svg|png|pdf|dot, default: svg)
    /// - JAGUAR_RENDER_PARTIAL (true|false, default: false)
    /// - JAGUAR_MAX_WORKSPACES (default: 256)
    /// - JAGUAR_MIN_FREE_BYTES (default: 64 MiB)
    /// - JAGUAR_MIN_FREE_INODES (default: 1024)
    /// - JAGUAR_ENV_ALLOWLIST (comma separated, default: PATH,LANG,LC_ALL,TZ)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let simulator_path = env_path("JAGUAR_SIMULATOR").unwrap_or(defaults.simulator_path);
        let renderer_path = env_path("JAGUAR_RENDERER").unwrap_or(defaults.renderer_path);
        let workspace_root =
            env_path("JAGUAR_WORKSPACE_ROOT").unwrap_or(defaults.workspace_root);

        let model_stem = std::env::var("JAGUAR_MODEL_STEM").unwrap_or(defaults.model_stem);

        let max_running_jobs =
            env_parse::<usize>("JAGUAR_MAX_RUNNING")?.unwrap_or(defaults.max_running_jobs);

        let job_timeout = env_parse::<u64>("JAGUAR_JOB_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.job_timeout);

        let render_timeout = env_parse::<u64>("JAGUAR_RENDER_TIMEOUT")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.render_timeout);

        let kill_grace = env_parse::<u64>("JAGUAR_KILL_GRACE")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.kill_grace);

        let output_byte_cap =
            env_parse::<usize>("JAGUAR_OUTPUT_CAP")?.unwrap_or(defaults.output_byte_cap);

        let retention = env_parse::<u64>("JAGUAR_RETENTION")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retention);

        let sweep_interval = env_parse::<u64>("JAGUAR_SWEEP_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let render_format = match std::env::var("JAGUAR_RENDER_FORMAT") {
            Ok(raw) => raw.parse::<RenderFormat>().map_err(|reason| ConfigError::Invalid {
                name: "JAGUAR_RENDER_FORMAT",
                reason,
            })?,
            Err(_) => defaults.render_format,
        };

        let render_partial =
            env_parse::<bool>("JAGUAR_RENDER_PARTIAL")?.unwrap_or(defaults.render_partial);

        let max_workspaces =
            env_parse::<usize>("JAGUAR_MAX_WORKSPACES")?.unwrap_or(defaults.max_workspaces);

        let min_free_bytes =
            env_parse::<u64>("JAGUAR_MIN_FREE_BYTES")?.unwrap_or(defaults.min_free_bytes);

        let min_free_inodes =
            env_parse::<u64>("JAGUAR_MIN_FREE_INODES")?.unwrap_or(defaults.min_free_inodes);

        let env_allowlist = std::env::var("JAGUAR_ENV_ALLOWLIST")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.env_allowlist);

        Ok(Self {
            simulator_path,
            renderer_path,
            workspace_root,
            model_stem,
            max_running_jobs,
            job_timeout,
            render_timeout,
            kill_grace,
            output_byte_cap,
            retention,
            sweep_interval,
            render_format,
            render_partial,
            max_workspaces,
            min_free_bytes,
            min_free_inodes,
            env_allowlist,
        })
    }

    pub fn with_max_running_jobs(mut self, max_running_jobs: usize) -> Self {
        self.max_running_jobs = max_running_jobs;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_render_format(mut self, render_format: RenderFormat) -> Self {
        self.render_format = render_format;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Name of the simulator input file inside a workspace
    pub fn input_file_name(&self) -> String {
        format!("{}.pds", self.model_stem)
    }

    /// Resolves the allowlist against the host environment
    ///
    /// Only names on the allowlist that are actually set are returned.
    pub fn process_environment(&self) -> Vec<(String, String)> {
        self.env_allowlist
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect()
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulator_path.as_os_str().is_empty() {
            return Err(invalid("simulator_path", "cannot be empty"));
        }

        if self.workspace_root.as_os_str().is_empty() {
            return Err(invalid("workspace_root", "cannot be empty"));
        }

        if self.model_stem.is_empty()
            || self
                .model_stem
                .contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
            || self.model_stem.starts_with('.')
        {
            return Err(invalid(
                "model_stem",
                "must be a plain file name without separators",
            ));
        }

        if self.max_running_jobs == 0 {
            return Err(invalid("max_running_jobs", "must be greater than 0"));
        }

        if self.job_timeout.is_zero() {
            return Err(invalid("job_timeout", "must be greater than 0"));
        }

        if self.render_timeout.is_zero() {
            return Err(invalid("render_timeout", "must be greater than 0"));
        }

        if self.output_byte_cap == 0 {
            return Err(invalid("output_byte_cap", "must be greater than 0"));
        }

        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "must be greater than 0"));
        }

        if self.max_workspaces < self.max_running_jobs {
            return Err(invalid(
                "max_workspaces",
                "must be at least max_running_jobs",
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            PathBuf::from("bin/simFDS"),
            std::env::temp_dir().join("jaguar"),
        )
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.to_string(),
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: format!("'{}': {}", raw, e),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_running_jobs, 2);
        assert_eq!(config.job_timeout, Duration::from_secs(300));
        assert_eq!(config.render_format, RenderFormat::Svg);
        assert_eq!(config.input_file_name(), "system.pds");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        config.max_running_jobs = 0;
        assert!(config.validate().is_err());
        config.max_running_jobs = 2;

        config.model_stem = "../escape".to_string();
        assert!(config.validate().is_err());
        config.model_stem = "system".to_string();

        config.output_byte_cap = 0;
        assert!(config.validate().is_err());
        config.output_byte_cap = 1024;

        config.max_workspaces = 1;
        assert!(config.validate().is_err());
        config.max_workspaces = 8;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = Config::default()
            .with_max_running_jobs(4)
            .with_job_timeout(Duration::from_secs(10))
            .with_render_format(RenderFormat::Png)
            .with_retention(Duration::from_secs(5));

        assert_eq!(config.max_running_jobs, 4);
        assert_eq!(config.job_timeout, Duration::from_secs(10));
        assert_eq!(config.render_format, RenderFormat::Png);
        assert_eq!(config.retention, Duration::from_secs(5));
    }

    #[test]
    fn test_process_environment_only_includes_allowlisted_names() {
        let mut config = Config::default();
        config.env_allowlist = vec!["PATH".to_string(), "JAGUAR_SURELY_UNSET_VAR".to_string()];

        let env = config.process_environment();
        assert!(env.iter().all(|(name, _)| name == "PATH"));
    }
}
