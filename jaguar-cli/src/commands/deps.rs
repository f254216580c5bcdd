//! Dependency graph output

use anyhow::Result;
use colored::*;
use jaguar_runner::render::graph::dependency_dot;
use std::path::Path;

use super::read_system;

/// Print the variable dependency graph of a system as DOT source
///
/// Needs neither the simulator nor Graphviz.
pub fn handle_deps(file: Option<&Path>) -> Result<()> {
    let system_text = read_system(file)?;
    let dot = dependency_dot(&system_text);

    if dot.is_empty() {
        eprintln!("{}", "No equations found in system.".yellow());
    } else {
        println!("{}", dot);
    }
    Ok(())
}
