//! Concurrent simulation of several systems

use anyhow::{Result, bail};
use colored::*;
use jaguar_core::domain::artifact::RenderFormat;
use jaguar_core::domain::job::{JobId, JobState, SimulationRequest};
use jaguar_core::dto::job::JobStatusView;
use jaguar_runner::Supervisor;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::run::export_artifact;
use super::{read_system, start_supervisor};
use crate::config::RuntimeArgs;
use crate::output;

#[derive(Serialize)]
struct BatchEntry {
    file: PathBuf,
    #[serde(flatten)]
    status: JobStatusView,
    primary: Option<PathBuf>,
}

/// Submit every file at once, wait for all of them and print a summary
///
/// Admission control decides how many run at a time; the rest wait in
/// submission order. With `export_dir`, each artifact is copied into its own
/// subdirectory. Fails when any job did not succeed.
pub async fn handle_batch(
    files: &[PathBuf],
    format: Option<RenderFormat>,
    export_dir: Option<&Path>,
    json: bool,
    runtime: &RuntimeArgs,
) -> Result<()> {
    let systems = files
        .iter()
        .map(|file| read_system(Some(file)))
        .collect::<Result<Vec<_>>>()?;

    let supervisor = start_supervisor(runtime)?;

    let mut jobs: Vec<(&Path, JobId)> = Vec::with_capacity(files.len());
    for (file, system_text) in files.iter().zip(systems) {
        let mut request = SimulationRequest::new(system_text);
        if let Some(format) = format {
            request = request.with_format(format);
        }
        jobs.push((file.as_path(), supervisor.submit(request)?));
    }

    if !json {
        println!(
            "{}",
            format!(
                "Submitted {} job(s), running up to {} at a time:",
                jobs.len(),
                supervisor.config().max_running_jobs
            )
            .bold()
        );
        println!();
    }

    let outcome = collect(&supervisor, &jobs, export_dir, json).await;
    supervisor.shutdown().await;
    outcome
}

async fn collect(
    supervisor: &Supervisor,
    jobs: &[(&Path, JobId)],
    export_dir: Option<&Path>,
    json: bool,
) -> Result<()> {
    tokio::select! {
        waited = wait_all(supervisor, jobs) => waited?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, canceling remaining jobs");
            for (_, id) in jobs {
                supervisor.cancel(*id)?;
            }
        }
    }

    let mut entries = Vec::with_capacity(jobs.len());
    for (index, (file, id)) in jobs.iter().enumerate() {
        let artifact = match (supervisor.result(*id), export_dir) {
            (Ok(artifact), Some(dir)) => {
                Some(export_artifact(&artifact, &job_output_dir(dir, index, file))?)
            }
            (result, _) => result.ok(),
        };
        entries.push(BatchEntry {
            file: file.to_path_buf(),
            status: supervisor.status(*id)?,
            primary: artifact.map(|artifact| artifact.primary),
        });
    }

    let failed = entries
        .iter()
        .filter(|entry| entry.status.state != JobState::Succeeded)
        .count();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}", entry.file.display().to_string().bold());
            if let Some(primary) = &entry.primary {
                println!("    Artifact: {}", primary.display());
            }
            output::print_status(&entry.status);
        }
        print_summary(entries.len(), failed);
        if export_dir.is_none() && entries.iter().any(|entry| entry.primary.is_some()) {
            output::print_workspace_note();
        }
    }

    if failed > 0 {
        bail!("{} of {} job(s) did not succeed", failed, entries.len());
    }
    Ok(())
}

async fn wait_all(supervisor: &Supervisor, jobs: &[(&Path, JobId)]) -> Result<()> {
    for (_, id) in jobs {
        supervisor.wait(*id).await?;
    }
    Ok(())
}

/// Per-job export directory, numbered so equal file names do not collide
fn job_output_dir(dir: &Path, index: usize, file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "system".to_string());
    dir.join(format!("{:02}-{}", index + 1, stem))
}

fn print_summary(total: usize, failed: usize) {
    let succeeded = total - failed;
    let line = format!("{} succeeded, {} failed", succeeded, failed);
    if failed == 0 {
        println!("{} {}", "✓".green(), line.green());
    } else {
        println!("{} {}", "✗".red(), line.red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_output_dirs_are_distinct() {
        let dir = Path::new("/tmp/results");
        assert_eq!(
            job_output_dir(dir, 0, Path::new("models/ring.pds")),
            PathBuf::from("/tmp/results/01-ring")
        );
        assert_ne!(
            job_output_dir(dir, 1, Path::new("a/ring.pds")),
            job_output_dir(dir, 2, Path::new("b/ring.pds"))
        );
        assert_eq!(
            job_output_dir(dir, 11, Path::new("-")),
            PathBuf::from("/tmp/results/12--")
        );
    }
}
