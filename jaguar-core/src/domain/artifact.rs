//! Render artifact domain types

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::job::JobId;

/// Output format of a rendered artifact
///
/// Closed set: each variant maps to exactly one rendering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderFormat {
    Svg,
    Png,
    Pdf,
    /// Normalised graph source, no backend invocation
    Dot,
}

impl RenderFormat {
    pub const ALL: [RenderFormat; 4] = [
        RenderFormat::Svg,
        RenderFormat::Png,
        RenderFormat::Pdf,
        RenderFormat::Dot,
    ];

    /// File extension for artifacts in this format
    pub fn extension(&self) -> &'static str {
        match self {
            RenderFormat::Svg => "svg",
            RenderFormat::Png => "png",
            RenderFormat::Pdf => "pdf",
            RenderFormat::Dot => "dot",
        }
    }

    /// Whether this format needs the external graph backend
    pub fn needs_backend(&self) -> bool {
        !matches!(self, RenderFormat::Dot)
    }
}

impl std::fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for RenderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(RenderFormat::Svg),
            "png" => Ok(RenderFormat::Png),
            "pdf" => Ok(RenderFormat::Pdf),
            "dot" | "gv" => Ok(RenderFormat::Dot),
            other => Err(format!(
                "unknown render format '{}' (expected svg, png, pdf or dot)",
                other
            )),
        }
    }
}

/// What a file inside an artifact holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Rendered state-space transition graph
    StateSpace,
    /// Rendered variable dependency graph
    DependencyGraph,
    /// Limit-cycle report written by the simulator
    LimitCycles,
    /// Normalised state-space graph source
    StateSpaceSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// Derived result of a completed job
///
/// Immutable once produced; regeneration creates a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub job_id: JobId,
    pub format: RenderFormat,
    /// The state-space rendering
    pub primary: PathBuf,
    pub attachments: Vec<ArtifactFile>,
    /// Rendered from the output of a run that did not succeed
    pub partial: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Artifact {
    /// Path of the first attachment of the given kind
    pub fn attachment(&self, kind: ArtifactKind) -> Option<&Path> {
        self.attachments
            .iter()
            .find(|file| file.kind == kind)
            .map(|file| file.path.as_path())
    }

    /// Every file that belongs to this artifact, primary first
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.primary.as_path())
            .chain(self.attachments.iter().map(|file| file.path.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("SVG".parse::<RenderFormat>().unwrap(), RenderFormat::Svg);
        assert_eq!(" png ".parse::<RenderFormat>().unwrap(), RenderFormat::Png);
        assert_eq!("gv".parse::<RenderFormat>().unwrap(), RenderFormat::Dot);
        assert!("jpeg".parse::<RenderFormat>().is_err());
    }

    #[test]
    fn test_only_dot_skips_backend() {
        for format in RenderFormat::ALL {
            assert_eq!(format.needs_backend(), format != RenderFormat::Dot);
        }
    }

    #[test]
    fn test_artifact_lookup() {
        let artifact = Artifact {
            job_id: JobId::new(),
            format: RenderFormat::Svg,
            primary: PathBuf::from("/ws/system-statespace.svg"),
            attachments: vec![ArtifactFile {
                kind: ArtifactKind::LimitCycles,
                path: PathBuf::from("/ws/system-limitcycles.txt"),
            }],
            partial: false,
            created_at: chrono::Utc::now(),
        };

        assert_eq!(
            artifact.attachment(ArtifactKind::LimitCycles),
            Some(Path::new("/ws/system-limitcycles.txt"))
        );
        assert!(artifact.attachment(ArtifactKind::DependencyGraph).is_none());
        assert_eq!(artifact.files().count(), 2);
    }
}
