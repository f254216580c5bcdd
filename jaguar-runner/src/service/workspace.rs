//! Workspace manager
//!
//! Allocates one directory per job under a configured root and removes it
//! again on release. Every path handed out is built from validated single
//! components, so nothing a job supplies can point outside the root.
//!
//! All methods do blocking filesystem work; async callers run them through
//! `tokio::task::spawn_blocking`.

use jaguar_core::domain::job::JobId;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::WorkspaceError;

/// A directory bound to exactly one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    job_id: JobId,
    path: PathBuf,
}

impl Workspace {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file directly inside the workspace
    pub fn file(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        validate_component(name)?;
        Ok(self.path.join(name))
    }

    /// Rebuilds a handle for a workspace that was allocated earlier
    pub(crate) fn existing(job_id: JobId, path: PathBuf) -> Self {
        Self { job_id, path }
    }
}

/// Allocates and reclaims per-job workspaces
pub struct WorkspaceManager {
    root: PathBuf,
    max_workspaces: usize,
    min_free_bytes: u64,
    min_free_inodes: u64,

    /// Jobs that currently own a workspace
    allocated: Mutex<HashSet<JobId>>,
}

impl WorkspaceManager {
    /// Creates a manager rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_workspaces: usize::MAX,
            min_free_bytes: 0,
            min_free_inodes: 0,
            allocated: Mutex::new(HashSet::new()),
        }
    }

    /// Creates a manager with the quotas from the configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_workspaces: config.max_workspaces,
            min_free_bytes: config.min_free_bytes,
            min_free_inodes: config.min_free_inodes,
            ..Self::new(config.workspace_root.clone())
        }
    }

    pub fn with_max_workspaces(mut self, max_workspaces: usize) -> Self {
        self.max_workspaces = max_workspaces;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory if it does not exist yet
    pub fn ensure_root(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.root).map_err(|e| WorkspaceError::io(&self.root, e))
    }

    /// Number of workspaces currently allocated
    pub fn allocated_count(&self) -> usize {
        self.lock().len()
    }

    /// Resolves the workspace path for a job without touching the disk
    pub fn path_for(&self, job_id: JobId) -> Result<PathBuf, WorkspaceError> {
        let name = job_id.to_string();
        validate_component(&name)?;
        let path = self.root.join(&name);
        if !path.starts_with(&self.root) {
            return Err(WorkspaceError::InvalidComponent(name));
        }
        Ok(path)
    }

    /// Allocates a fresh workspace directory for `job_id`
    ///
    /// Fails when the quota is reached, the filesystem is short on space or
    /// inodes, or the directory already exists.
    pub fn allocate(&self, job_id: JobId) -> Result<Workspace, WorkspaceError> {
        let path = self.path_for(job_id)?;
        let mut allocated = self.lock();

        if allocated.contains(&job_id) {
            return Err(WorkspaceError::AlreadyExists(path));
        }

        if allocated.len() >= self.max_workspaces {
            return Err(WorkspaceError::QuotaExceeded {
                limit: self.max_workspaces,
            });
        }

        self.ensure_root()?;
        self.check_capacity()?;

        // create_dir (not create_dir_all) so a leftover directory is an error
        fs::create_dir(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                WorkspaceError::AlreadyExists(path.clone())
            } else {
                WorkspaceError::io(&path, e)
            }
        })?;

        allocated.insert(job_id);
        debug!(job_id = %job_id, path = %path.display(), "Workspace allocated");

        Ok(Workspace { job_id, path })
    }

    /// Recursively removes a job's workspace
    ///
    /// Releasing a workspace that is already gone is a no-op.
    pub fn release(&self, job_id: JobId) -> Result<(), WorkspaceError> {
        let path = self.path_for(job_id)?;
        let mut allocated = self.lock();

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(job_id = %job_id, "Workspace released");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(job_id = %job_id, "Workspace already released");
            }
            Err(e) => return Err(WorkspaceError::io(&path, e)),
        }

        allocated.remove(&job_id);
        Ok(())
    }

    /// Writes a file into the workspace atomically
    ///
    /// Data goes to a hidden temporary name first and is renamed into place
    /// after an fsync, so readers never observe a half-written file.
    pub fn write_input(
        &self,
        workspace: &Workspace,
        file_name: &str,
        contents: &[u8],
    ) -> Result<PathBuf, WorkspaceError> {
        let target = workspace.file(file_name)?;
        let temp = workspace
            .path()
            .join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp)?;
            file.write_all(contents)?;
            file.sync_all()?;
            fs::rename(&temp, &target)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(WorkspaceError::io(&target, e));
        }

        Ok(target)
    }

    /// Removes workspace directories not owned by any allocated job
    ///
    /// Used at startup to clean up after a previous process that exited
    /// without releasing its workspaces. Returns how many were removed.
    pub fn reclaim_orphans(&self) -> Result<usize, WorkspaceError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(WorkspaceError::io(&self.root, e)),
        };

        let allocated = self.lock();
        let mut removed = 0;

        for entry in entries {
            let entry = entry.map_err(|e| WorkspaceError::io(&self.root, e))?;
            let Some(job_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<JobId>().ok())
            else {
                continue;
            };

            if allocated.contains(&job_id) || !entry.path().is_dir() {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), "Failed to reclaim orphan workspace: {}", e),
            }
        }

        if removed > 0 {
            info!("Reclaimed {} orphan workspace(s)", removed);
        }
        Ok(removed)
    }

    #[cfg(unix)]
    fn check_capacity(&self) -> Result<(), WorkspaceError> {
        if self.min_free_bytes == 0 && self.min_free_inodes == 0 {
            return Ok(());
        }

        let stat = nix::sys::statvfs::statvfs(&self.root)
            .map_err(|e| WorkspaceError::io(&self.root, std::io::Error::from(e)))?;

        #[allow(clippy::useless_conversion)]
        let available = u64::from(stat.blocks_available()) * u64::from(stat.fragment_size());
        if available < self.min_free_bytes {
            return Err(WorkspaceError::InsufficientSpace {
                available,
                required: self.min_free_bytes,
            });
        }

        #[allow(clippy::useless_conversion)]
        let inodes = u64::from(stat.files_available());
        if inodes < self.min_free_inodes {
            return Err(WorkspaceError::InsufficientInodes {
                available: inodes,
                required: self.min_free_inodes,
            });
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_capacity(&self) -> Result<(), WorkspaceError> {
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<JobId>> {
        self.allocated
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accepts only a single, normal path component
pub fn validate_component(name: &str) -> Result<(), WorkspaceError> {
    let rejected = || WorkspaceError::InvalidComponent(name.to_string());

    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(rejected());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(rejected()),
    }
}
