//! Jaguar Runner
//!
//! Runs an untrusted external simulator once per request, each run in its
//! own workspace, under a concurrency limit and a wall-clock timeout, and
//! turns the simulator's output into rendered artifacts.
//!
//! Architecture:
//! - Configuration: settings from the environment or defaults
//! - Services: workspace allocation and bounded output capture
//! - Process: the [`ProcessRunner`] capability (real or scripted)
//! - Render: post-processing of simulator output into artifacts
//! - Scheduler: FIFO admission, job lifecycle, retention

pub mod config;
pub mod error;
pub mod execution;
pub mod process;
pub mod render;
pub mod scheduler;
pub mod service;

pub use config::Config;
pub use error::{
    ConfigError, LaunchError, RenderError, ResultError, SupervisorError, WorkspaceError,
};
pub use process::{DirectRunner, FakeBehavior, FakeRunner, ProcessRunner, ProcessSpec};
pub use render::Renderer;
pub use scheduler::Supervisor;
