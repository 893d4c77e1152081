//! Colored terminal output for operator feedback.
//!
//! Server output itself is echoed raw; these helpers only print the
//! supervisor's own replies to operator commands.

use std::io::{self, Write};
use std::time::Duration;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::console::HitchEvent;
use crate::process::LaunchSpec;
use crate::supervisor::{ServerState, SupervisorStatus};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Format a duration as `1h 2m 3s`, dropping leading zero units.
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Print the supervisor status.
pub fn print_status(status: &SupervisorStatus) {
    let state = match status.state {
        ServerState::Running => status.state.as_str().green().bold().to_string(),
        ServerState::Crashed => status.state.as_str().red().bold().to_string(),
        ServerState::Starting | ServerState::Stopping => {
            status.state.as_str().yellow().bold().to_string()
        }
        ServerState::Stopped => status.state.as_str().dimmed().to_string(),
    };
    let pid = status
        .pid
        .map_or_else(|| "-".to_string(), |pid| pid.to_string());
    println!(
        "{} {} {} pid={} generation={}",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        state,
        pid.cyan(),
        status.generation
    );
    let _ = io::stdout().flush();
}

/// Print server uptime.
pub fn print_uptime(uptime: Duration) {
    println!(
        "{} {} up {}",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        format_uptime(uptime)
    );
    let _ = io::stdout().flush();
}

/// Most recent hitches shown by [`print_hitches`].
const SHOWN_HITCHES: usize = 5;

/// Summarize hitches: the total and the latest frame times, newest first.
#[must_use]
pub fn format_hitches(total: u64, recent: &[HitchEvent]) -> String {
    if recent.is_empty() {
        return format!("{total} hitches");
    }
    let latest: Vec<String> = recent
        .iter()
        .rev()
        .take(SHOWN_HITCHES)
        .map(|event| format!("{}ms", event.millis))
        .collect();
    format!("{total} hitches, latest {}", latest.join(", "))
}

/// Print the hitch summary.
pub fn print_hitches(total: u64, recent: &[HitchEvent]) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[HITCH]".yellow().bold(),
        format_hitches(total, recent)
    );
    let _ = io::stdout().flush();
}

/// Print the number of processes under the server shell.
pub fn print_children(count: usize) {
    println!(
        "{} {} {} child processes",
        timestamp().dimmed(),
        "[SERVER]".blue().bold(),
        count.cyan()
    );
    let _ = io::stdout().flush();
}

/// Print output captured for a command.
pub fn print_capture(command: &str, output: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[CAPTURE]".magenta().bold(),
        command.bold()
    );
    print!("{output}");
    if !output.is_empty() && !output.ends_with('\n') {
        println!();
    }
    let _ = io::stdout().flush();
}

/// Print the launch command.
pub fn print_launch(spec: &LaunchSpec) {
    println!(
        "{} {}",
        "[LAUNCH]".cyan().bold(),
        spec.display_command()
    );
    println!(
        "{} {}",
        "[CWD]".cyan().bold(),
        spec.cwd().display().dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ERROR]".red().bold(),
        message.red()
    );
}
