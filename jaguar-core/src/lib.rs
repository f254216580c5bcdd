//! Jaguar Core
//!
//! Core types shared by the Jaguar simulation service.
//!
//! This crate contains:
//! - Domain types: Job, JobState, Artifact, log entries
//! - DTOs: Views handed across the service boundary (status, diagnostics)

pub mod domain;
pub mod dto;
