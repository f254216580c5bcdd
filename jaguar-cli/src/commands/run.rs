//! Single simulation run

use anyhow::{Context, Result, bail};
use colored::*;
use jaguar_core::domain::artifact::{Artifact, RenderFormat};
use jaguar_core::domain::job::{JobId, SimulationRequest};
use jaguar_core::dto::job::{JobDiagnostics, JobStatusView};
use jaguar_runner::{ResultError, Supervisor};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{read_system, start_supervisor};
use crate::config::RuntimeArgs;
use crate::output;

/// Flags of the `run` command
pub struct RunOptions {
    pub format: Option<RenderFormat>,
    pub no_render: bool,
    pub output: Option<PathBuf>,
    pub events: bool,
    pub json: bool,
}

/// Machine readable outcome of a run
#[derive(Serialize)]
struct RunReport {
    status: JobStatusView,
    artifact: Option<Artifact>,
    /// Present for jobs that did not succeed
    diagnostics: Option<JobDiagnostics>,
}

/// Submit one system, follow it to completion and print the outcome
///
/// Ctrl-C cancels the job; the command still reports the canceled state.
///
/// # Arguments
/// * `file` - System file, `-` for stdin, or `None` for the built-in example
/// * `options` - Render and output flags
/// * `runtime` - Global configuration flags
pub async fn handle_run(
    file: Option<&Path>,
    options: RunOptions,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let system_text = read_system(file)?;
    let supervisor = start_supervisor(runtime)?;

    let mut request = SimulationRequest::new(system_text);
    if let Some(format) = options.format {
        request = request.with_format(format);
    }
    if options.no_render {
        request = request.without_render();
    }

    let id = supervisor.submit(request)?;
    if !options.json {
        println!("{} Submitted job {}", "▸".cyan(), id.to_string().dimmed());
    }

    let outcome = follow(&supervisor, id, &options).await;
    supervisor.shutdown().await;
    outcome
}

async fn follow(supervisor: &Supervisor, id: JobId, options: &RunOptions) -> Result<()> {
    let status = tokio::select! {
        status = supervisor.wait(id) => status?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %id, "Interrupted, canceling job");
            supervisor.cancel(id)?;
            supervisor.wait(id).await?
        }
    };

    let result = supervisor.result(id);
    let diagnostics = supervisor.diagnostics(id)?;

    let artifact = match &result {
        Ok(artifact) => {
            let artifact = match &options.output {
                Some(dir) => export_artifact(artifact, dir)?,
                None => artifact.clone(),
            };
            Some(artifact)
        }
        Err(_) => None,
    };

    if options.json {
        let report = RunReport {
            status,
            artifact,
            diagnostics: result.is_err().then_some(diagnostics.clone()),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        output::print_status(&status);
        match &artifact {
            Some(artifact) => {
                output::print_artifact(artifact);
                if options.output.is_none() {
                    output::print_workspace_note();
                }
            }
            None if matches!(result, Err(ResultError::NoArtifact(_))) => {
                println!("{}", "Rendering disabled, no artifact produced.".dimmed());
            }
            None => {
                output::print_failure(&diagnostics);
                if let Some(partial) = &diagnostics.partial_artifact {
                    println!();
                    output::print_artifact(partial);
                }
            }
        }
        if options.events {
            println!("\n{}", "Events:".bold());
            output::print_events(&diagnostics.events);
        }
    }

    match result {
        Ok(_) | Err(ResultError::NoArtifact(_)) => Ok(()),
        Err(e) => bail!("Job {} did not succeed: {}", id, e),
    }
}

/// Copy every artifact file into `dir`, returning the artifact re-pointed
/// at the copies
pub(super) fn export_artifact(artifact: &Artifact, dir: &Path) -> Result<Artifact> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let copy = |path: &Path| -> Result<PathBuf> {
        let name = path
            .file_name()
            .with_context(|| format!("Artifact path has no file name: {}", path.display()))?;
        let target = dir.join(name);
        std::fs::copy(path, &target).with_context(|| {
            format!("Failed to copy {} to {}", path.display(), target.display())
        })?;
        Ok(target)
    };

    let mut exported = artifact.clone();
    exported.primary = copy(&artifact.primary)?;
    for attachment in &mut exported.attachments {
        attachment.path = copy(&attachment.path)?;
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jaguar_core::domain::artifact::{ArtifactFile, ArtifactKind};

    #[test]
    fn test_export_artifact_copies_every_file() {
        let source = tempfile::tempdir().unwrap();
        let primary = source.path().join("system-statespace.svg");
        let cycles = source.path().join("system-limitcycles.txt");
        std::fs::write(&primary, "<svg/>").unwrap();
        std::fs::write(&cycles, "cycle 1: 00 -> 00\n").unwrap();

        let artifact = Artifact {
            job_id: JobId::new(),
            format: RenderFormat::Svg,
            primary: primary.clone(),
            attachments: vec![ArtifactFile {
                kind: ArtifactKind::LimitCycles,
                path: cycles,
            }],
            partial: false,
            created_at: chrono::Utc::now(),
        };

        let target = tempfile::tempdir().unwrap();
        let out = target.path().join("results");
        let exported = export_artifact(&artifact, &out).unwrap();

        assert_eq!(exported.primary, out.join("system-statespace.svg"));
        assert_eq!(std::fs::read_to_string(&exported.primary).unwrap(), "<svg/>");
        let copied = exported.attachment(ArtifactKind::LimitCycles).unwrap();
        assert_eq!(copied, out.join("system-limitcycles.txt"));
        assert!(copied.exists());
        assert!(primary.exists());
    }
}
