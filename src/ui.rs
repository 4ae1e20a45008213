use chrono::{DateTime, Utc};
use colored::Colorize;

/// Placeholder for timestamps that are absent or unknown
pub const NOT_AVAILABLE: &str = "N/A";

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print one planned or applied operation
pub fn operation(line: &str, removal: bool) {
    let marker = if removal { "-".red() } else { "+".green() };
    println!("  {} {}", marker, line);
}

// ============================================================================
// Formatting
// ============================================================================

/// Format a timestamp as RFC 3339, or `N/A`
pub fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(
        || NOT_AVAILABLE.to_string(),
        |t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    )
}

/// Format an optional flag as yes/no/unknown
pub fn format_flag(flag: Option<bool>) -> &'static str {
    match flag {
        Some(true) => "yes",
        Some(false) => "no",
        None => "?",
    }
}

/// Pluralize a count: `1 user`, `2 users`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

// ============================================================================
// Tests
// ============================================================================
