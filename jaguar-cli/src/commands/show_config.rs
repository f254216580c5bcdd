//! Effective configuration display

use anyhow::Result;
use colored::*;

use crate::config::RuntimeArgs;

/// Print the configuration a `run` would use
pub fn handle_config(runtime: &RuntimeArgs) -> Result<()> {
    let config = runtime.load()?;

    println!("{}", "Configuration:".bold());
    println!("  Simulator:       {}", config.simulator_path.display().to_string().cyan());
    println!("  Renderer:        {}", config.renderer_path.display());
    println!("  Workspace root:  {}", config.workspace_root.display());
    println!("  Model stem:      {}", config.model_stem);
    println!("  Input file:      {}", config.input_file_name().dimmed());
    println!("  Max running:     {}", config.max_running_jobs);
    println!("  Max workspaces:  {}", config.max_workspaces);
    println!("  Job timeout:     {}s", config.job_timeout.as_secs_f64());
    println!("  Render timeout:  {}s", config.render_timeout.as_secs_f64());
    println!("  Kill grace:      {}ms", config.kill_grace.as_millis());
    println!("  Output cap:      {} bytes", config.output_byte_cap);
    println!("  Retention:       {}s", config.retention.as_secs());
    println!("  Sweep interval:  {}s", config.sweep_interval.as_secs());
    println!("  Render format:   {}", config.render_format);
    println!("  Render partial:  {}", config.render_partial);
    println!("  Min free bytes:  {}", config.min_free_bytes);
    println!("  Min free inodes: {}", config.min_free_inodes);
    println!(
        "  Environment:     {}",
        config.env_allowlist.join(", ").dimmed()
    );

    if !config.simulator_path.exists() {
        println!(
            "\n{}",
            format!(
                "⚠ Simulator not found at {}",
                config.simulator_path.display()
            )
            .yellow()
        );
    }
    Ok(())
}
