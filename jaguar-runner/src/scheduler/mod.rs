//! Scheduler layer
//!
//! Job admission, lifecycle supervision and retention. The [`Supervisor`]
//! is the service boundary: submit, status, cancel and result, plus
//! diagnostics, listing, waiting, regeneration and shutdown.

mod registry;
mod supervisor;
mod sweeper;

pub use supervisor::Supervisor;
