//! Core domain types
//!
//! This module contains the core domain structures used across Jaguar components.
//! The job supervisor owns `Job` values; every other component receives
//! references or cloned snapshots.

pub mod artifact;
pub mod job;
pub mod log;
