//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod batch;
mod deps;
mod run;
mod show_config;

use anyhow::{Context, Result};
use clap::Subcommand;
use jaguar_core::domain::artifact::RenderFormat;
use jaguar_runner::{DirectRunner, Supervisor};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RuntimeArgs;

/// System simulated when no input file is given
pub const DEFAULT_SYSTEM_TEXT: &str = "NUMBER OF VARIABLES: 3\n\
                                       NUMBER OF STATES: 2\n\
                                       x1 = x2\n\
                                       x2 = x1 + x3\n\
                                       x3 = x2 + x1\n";

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Simulate one system and print its results
    Run {
        /// System file; the built-in example when omitted, `-` for stdin
        file: Option<PathBuf>,

        /// Artifact format (svg, png, pdf or dot)
        #[arg(short, long)]
        format: Option<RenderFormat>,

        /// Skip rendering; only run the simulator
        #[arg(long, conflicts_with = "format")]
        no_render: bool,

        /// Copy the artifact files into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also print the job's lifecycle events
        #[arg(long)]
        events: bool,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Simulate several systems concurrently
    Batch {
        /// System files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Artifact format (svg, png, pdf or dot)
        #[arg(short, long)]
        format: Option<RenderFormat>,

        /// Copy each job's artifact files into a subdirectory of this one
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the variable dependency graph of a system as DOT
    Deps {
        /// System file; the built-in example when omitted, `-` for stdin
        file: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `runtime` - Global flags layered over the environment configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, runtime: &RuntimeArgs) -> Result<()> {
    match command {
        Commands::Run {
            file,
            format,
            no_render,
            output,
            events,
            json,
        } => {
            let options = run::RunOptions {
                format,
                no_render,
                output,
                events,
                json,
            };
            run::handle_run(file.as_deref(), options, runtime).await
        }
        Commands::Batch {
            files,
            format,
            output,
            json,
        } => batch::handle_batch(&files, format, output.as_deref(), json, runtime).await,
        Commands::Deps { file } => deps::handle_deps(file.as_deref()),
        Commands::Config => show_config::handle_config(runtime),
    }
}

/// Read a system description
///
/// `None` yields the built-in example and `-` reads standard input.
pub fn read_system(file: Option<&Path>) -> Result<String> {
    match file {
        None => Ok(DEFAULT_SYSTEM_TEXT.to_string()),
        Some(path) if path == Path::new("-") => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read system from stdin")?;
            Ok(text)
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system file {}", path.display())),
    }
}

/// Start a supervisor that launches real processes
fn start_supervisor(runtime: &RuntimeArgs) -> Result<Supervisor> {
    let config = runtime.load()?;
    Supervisor::start(config, Arc::new(DirectRunner::new()))
        .context("Failed to start job supervisor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_read_system_defaults_to_builtin_example() {
        let text = read_system(None).unwrap();
        assert!(text.starts_with("NUMBER OF VARIABLES: 3\n"));
        assert!(text.contains("x2 = x1 + x3\n"));
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_read_system_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pds");
        std::fs::write(&path, "x1 = x1\n").unwrap();
        assert_eq!(read_system(Some(&path)).unwrap(), "x1 = x1\n");
        assert!(read_system(Some(&dir.path().join("missing.pds"))).is_err());
    }

    #[test]
    fn test_run_arguments_parse() {
        let cli = TestCli::parse_from(["jaguar", "run", "model.pds", "--format", "png", "--json"]);
        match cli.command {
            Commands::Run {
                file, format, json, ..
            } => {
                assert_eq!(file, Some(PathBuf::from("model.pds")));
                assert_eq!(format, Some(RenderFormat::Png));
                assert!(json);
            }
            _ => panic!("expected run"),
        }

        let cli = TestCli::parse_from(["jaguar", "batch", "a.pds", "b.pds", "-o", "out"]);
        match cli.command {
            Commands::Batch { files, output, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(output, Some(PathBuf::from("out")));
            }
            _ => panic!("expected batch"),
        }

        assert!(TestCli::try_parse_from(["jaguar", "run", "--format", "gif"]).is_err());
        assert!(TestCli::try_parse_from(["jaguar", "batch"]).is_err());
    }
}
