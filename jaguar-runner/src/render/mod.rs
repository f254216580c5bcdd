//! Result renderer
//!
//! Turns the files a finished simulator run left in its workspace into an
//! [`Artifact`]. Every render writes into its own fresh directory inside
//! the workspace, so an artifact's files never change once produced and a
//! regeneration never overwrites the previous one.
//!
//! Two strategies, chosen by [`RenderFormat`]:
//! - `Dot`: the normalised graph source is the artifact
//! - `Svg`/`Png`/`Pdf`: the graph backend (`dot -T<fmt>`) is run through the
//!   [`ProcessRunner`] with its own timeout

pub mod graph;

use jaguar_core::domain::artifact::{Artifact, ArtifactFile, ArtifactKind, RenderFormat};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::RenderError;
use crate::execution::Termination;
use crate::process::{ProcessRunner, ProcessSpec};
use crate::service::Workspace;

/// Produces artifacts from simulator output
#[derive(Clone)]
pub struct Renderer {
    runner: Arc<dyn ProcessRunner>,
    config: Arc<Config>,
}

impl Renderer {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: Arc<Config>) -> Self {
        Self { runner, config }
    }

    /// Simulator output file holding the state-space graph
    pub fn statespace_file(&self) -> String {
        format!("{}-statespace.dot", self.config.model_stem)
    }

    /// Simulator output file holding the limit-cycle report
    pub fn limitcycles_file(&self) -> String {
        format!("{}-limitcycles.txt", self.config.model_stem)
    }

    /// Renders the outputs in `workspace`
    ///
    /// `system_text` is the job's input, used for the dependency graph.
    /// `partial` marks an artifact built from a run that did not succeed.
    pub async fn render(
        &self,
        workspace: &Workspace,
        system_text: &str,
        format: RenderFormat,
        partial: bool,
        cancel: CancellationToken,
    ) -> Result<Artifact, RenderError> {
        let source_path = workspace
            .file(&self.statespace_file())
            .map_err(|e| RenderError::MalformedOutput {
                path: workspace.path().to_path_buf(),
                reason: e.to_string(),
            })?;
        let source = read_statespace(&source_path).await?;

        let out_dir = workspace
            .path()
            .join(format!("render-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir(&out_dir)
            .await
            .map_err(|e| RenderError::io(&out_dir, e))?;
        debug!(job_id = %workspace.job_id(), dir = %out_dir.display(), "Rendering {} artifact", format);

        let sorted_path = out_dir.join("statespace.dot");
        write_file(&sorted_path, &graph::reorder_statespace(&source)).await?;

        let mut attachments = Vec::new();
        let primary = if format.needs_backend() {
            let rendered = out_dir.join(format!("statespace.{}", format.extension()));
            self.run_backend(&out_dir, &sorted_path, &rendered, format, cancel.clone())
                .await?;
            attachments.push(ArtifactFile {
                kind: ArtifactKind::StateSpaceSource,
                path: sorted_path,
            });
            rendered
        } else {
            sorted_path
        };

        let dependencies = graph::dependency_dot(system_text);
        if !dependencies.is_empty() {
            let dep_source = out_dir.join("dependencies.dot");
            write_file(&dep_source, &dependencies).await?;
            let dep_path = if format.needs_backend() {
                let rendered = out_dir.join(format!("dependencies.{}", format.extension()));
                self.run_backend(&out_dir, &dep_source, &rendered, format, cancel)
                    .await?;
                rendered
            } else {
                dep_source
            };
            attachments.push(ArtifactFile {
                kind: ArtifactKind::DependencyGraph,
                path: dep_path,
            });
        }

        let limitcycles = workspace.path().join(self.limitcycles_file());
        if tokio::fs::try_exists(&limitcycles).await.unwrap_or(false) {
            attachments.push(ArtifactFile {
                kind: ArtifactKind::LimitCycles,
                path: limitcycles,
            });
        }

        info!(job_id = %workspace.job_id(), primary = %primary.display(), partial, "Artifact rendered");

        Ok(Artifact {
            job_id: workspace.job_id(),
            format,
            primary,
            attachments,
            partial,
            created_at: chrono::Utc::now(),
        })
    }

    async fn run_backend(
        &self,
        work_dir: &Path,
        input: &Path,
        output: &Path,
        format: RenderFormat,
        cancel: CancellationToken,
    ) -> Result<(), RenderError> {
        let spec = ProcessSpec::new(&self.config.renderer_path, work_dir)
            .with_limits(&self.config, self.config.render_timeout)
            .arg(format!("-T{}", format.extension()))
            .arg("-o")
            .arg(output.to_string_lossy())
            .arg(input.to_string_lossy());

        let outcome = self.runner.run(spec, cancel).await?;
        match outcome.termination {
            Termination::Exited(0) => {}
            Termination::TimedOut => return Err(RenderError::BackendTimedOut),
            Termination::Canceled => return Err(RenderError::Canceled),
            Termination::Exited(code) => {
                return Err(RenderError::BackendFailed {
                    status: format!("exit code {}", code),
                    stderr: outcome.output.stderr.trim().to_string(),
                });
            }
            Termination::Signaled(signal) => {
                return Err(RenderError::BackendFailed {
                    status: format!("signal {}", signal),
                    stderr: outcome.output.stderr.trim().to_string(),
                });
            }
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(RenderError::NoArtifact(output.to_path_buf())),
        }
    }
}

async fn read_statespace(path: &Path) -> Result<String, RenderError> {
    let source = match tokio::fs::read_to_string(path).await {
        Ok(source) => source,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RenderError::MissingOutput(path.to_path_buf()));
        }
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(RenderError::MalformedOutput {
                path: path.to_path_buf(),
                reason: "not valid UTF-8".to_string(),
            });
        }
        Err(e) => return Err(RenderError::io(path, e)),
    };

    if source.trim().is_empty() {
        return Err(RenderError::MalformedOutput {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    if !graph::is_digraph(&source) {
        return Err(RenderError::MalformedOutput {
            path: path.to_path_buf(),
            reason: "no digraph declaration".to_string(),
        });
    }
    Ok(source)
}

async fn write_file(path: &Path, contents: &str) -> Result<(), RenderError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| RenderError::io(path, e))
}
