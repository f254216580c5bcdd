//! Data Transfer Objects for the service boundary
//!
//! Views of supervisor-owned jobs handed to callers (the CLI, or an HTTP
//! facade). The primary status payload stays small; captured output lives
//! in the diagnostics view only.

pub mod job;
