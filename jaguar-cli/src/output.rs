//! Terminal output helpers

use colored::*;
use jaguar_core::domain::artifact::{Artifact, ArtifactKind};
use jaguar_core::domain::job::JobState;
use jaguar_core::domain::log::{LogEntry, LogLevel};
use jaguar_core::dto::job::{JobDiagnostics, JobStatusView};

/// Lines of captured stderr shown for a failed job
const STDERR_TAIL_LINES: usize = 20;

/// Colorize job state for display
pub fn colorize_state(state: JobState) -> ColoredString {
    let state_str = state.to_string();
    match state {
        JobState::Queued => state_str.yellow(),
        JobState::Running => state_str.cyan(),
        JobState::Succeeded => state_str.green(),
        JobState::Failed | JobState::TimedOut => state_str.red(),
        JobState::Canceled => state_str.dimmed(),
    }
}

/// Print a one-job summary block
pub fn print_status(status: &JobStatusView) {
    println!("  {} Job {}", "▸".cyan(), status.id.to_string().dimmed());
    println!("    State:    {}", colorize_state(status.state));
    if let (Some(started), Some(finished)) = (status.started_at, status.finished_at) {
        let millis = finished.signed_duration_since(started).num_milliseconds();
        println!("    Duration: {:.2}s", millis as f64 / 1000.0);
    }
    if let Some(code) = status.exit_code {
        println!("    Exit:     {}", code);
    }
    if let Some(cause) = &status.cause {
        println!("    Cause:    {}", cause.red());
    }
    println!();
}

/// Print artifact paths and the limit cycles found by the simulator
pub fn print_artifact(artifact: &Artifact) {
    let heading = if artifact.partial {
        "Partial artifact:".yellow().bold()
    } else {
        "Artifact:".bold()
    };
    println!("{}", heading);
    println!(
        "  {} {} ({})",
        "✓".green(),
        artifact.primary.display(),
        artifact.format
    );
    for attachment in &artifact.attachments {
        println!(
            "    {} {}",
            format!("{:?}:", attachment.kind).dimmed(),
            attachment.path.display()
        );
    }

    if let Some(path) = artifact.attachment(ArtifactKind::LimitCycles) {
        match std::fs::read_to_string(path) {
            Ok(cycles) if !cycles.trim().is_empty() => {
                println!("\n{}", "Limit cycles:".bold());
                println!("{}", cycles.trim_end());
            }
            Ok(_) => {}
            Err(e) => println!("{}", format!("⚠ Could not read limit cycles: {}", e).yellow()),
        }
    }
}

/// Explain how long artifact paths inside the workspace root stay valid
pub fn print_workspace_note() {
    println!(
        "\n{}",
        "Note: these paths are valid until the next jaguar command reclaims the workspace root; use --output to keep them."
            .dimmed()
    );
}

/// Print failure detail and the tail of the simulator's stderr
pub fn print_failure(diagnostics: &JobDiagnostics) {
    if let Some(failure) = &diagnostics.failure {
        println!("{}", "Error:".bold());
        println!("  {}", failure.message.red());
    }

    let stderr = diagnostics.stderr.trim_end();
    if !stderr.is_empty() {
        let lines: Vec<&str> = stderr.lines().collect();
        let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
        println!("\n{}", "Simulator stderr:".bold());
        println!("{}", "─".repeat(80).dimmed());
        for line in &lines[skip..] {
            println!("{}", line);
        }
        println!("{}", "─".repeat(80).dimmed());
    }
    if diagnostics.truncated {
        println!("{}", "  (output truncated)".dimmed());
    }
    if let Some(workspace) = &diagnostics.workspace {
        println!("  Workspace: {}", workspace.display().to_string().dimmed());
    }
}

/// Print a job's lifecycle events
pub fn print_events(events: &[LogEntry]) {
    for event in events {
        print_log_entry(event);
    }
}

fn print_log_entry(log: &LogEntry) {
    let level_str = log.level.to_string();
    let level_colored = match log.level {
        LogLevel::Debug => level_str.dimmed(),
        LogLevel::Info => level_str.cyan(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Error => level_str.red(),
    };

    println!(
        "{} [{}] {}",
        log.timestamp.format("%H:%M:%S").to_string().dimmed(),
        level_colored,
        log.message
    );
}
