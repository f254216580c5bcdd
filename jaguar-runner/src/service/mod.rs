//! Service layer
//!
//! Building blocks the supervisor composes: per-job workspaces on disk and
//! bounded capture of process output.

mod output_buffer;
mod workspace;

pub use output_buffer::{OutputBuffer, Stream};
pub use workspace::{Workspace, WorkspaceManager, validate_component};
