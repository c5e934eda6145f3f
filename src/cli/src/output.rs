//! Table formatting and argument parsing helpers for CLI output.

use chrono::{DateTime, Duration, Utc};
use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a timestamp as a relative "ago" string.
pub fn format_ago(dt: &DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(*dt);

    let secs = duration.num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }
    if secs < 60 {
        return format!("{secs} seconds ago");
    }

    let mins = duration.num_minutes();
    if mins < 60 {
        return format!("{mins} minutes ago");
    }

    let hours = duration.num_hours();
    if hours < 24 {
        return format!("{hours} hours ago");
    }

    let days = duration.num_days();
    if days < 30 {
        return format!("{days} days ago");
    }

    let months = days / 30;
    if months < 12 {
        return format!("{months} months ago");
    }

    format!("{} years ago", days / 365)
}

/// Parse a duration like "90s", "30m", "12h", "7d" or "2w".
///
/// No suffix assumes seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return Err("empty duration value".to_string());
    }

    let (num_str, unit): (&str, fn(i64) -> Duration) = if let Some(n) = s.strip_suffix('w') {
        (n, Duration::weeks)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, Duration::days)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, Duration::hours)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, Duration::minutes)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, Duration::seconds)
    } else {
        (s.as_str(), Duration::seconds)
    };

    let num: u32 = num_str
        .parse()
        .map_err(|_| format!("invalid duration value: {s}"))?;

    Ok(unit(i64::from(num)))
}
