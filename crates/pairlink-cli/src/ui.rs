//! UI utilities for the Pairlink CLI.

use std::time::Duration;

use pairlink_core::{ChannelKind, CommandStatus, TransferProgress};

const BAR_WIDTH: usize = 20;

/// Render the channel table.
pub fn channel_table() -> String {
    let width = ChannelKind::ALL
        .iter()
        .map(|k| k.as_str().len())
        .max()
        .unwrap_or(0);

    let mut out = format!("  {:<width$}  {:<8}  {}\n", "Channel", "Durable", "Needs peer");
    out.push_str(&format!("  {}\n", "─".repeat(width + 22)));
    for kind in ChannelKind::ALL {
        let props = kind.properties();
        out.push_str(&format!(
            "  {:<width$}  {:<8}  {}\n",
            kind.as_str(),
            yes_no(props.durable),
            yes_no(props.requires_reachability)
        ));
    }
    out
}

const fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// A status line prefixed with the device that observed it.
pub fn status_line(device: &str, status: &CommandStatus) -> String {
    format!("  [{device:>5}] {}", status.summary())
}

/// Render `progress` as `[#####.....]  42% completed`.
pub fn progress_bar(progress: &TransferProgress) -> String {
    let filled = ((progress.fraction() * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!(
        "[{}{}] {}",
        "#".repeat(filled),
        ".".repeat(BAR_WIDTH - filled),
        progress.describe()
    )
}

/// Parse a duration string like "250ms", "30s", "5m", or "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(num_str) = s.strip_suffix("ms") {
        num_str.parse().ok().map(Duration::from_millis)
    } else if let Some(num_str) = s.strip_suffix('m') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 60))
    } else if let Some(num_str) = s.strip_suffix('s') {
        num_str.parse().ok().map(Duration::from_secs)
    } else if let Some(num_str) = s.strip_suffix('h') {
        let num: u64 = num_str.parse().ok()?;
        Some(Duration::from_secs(num * 3600))
    } else {
        None
    }
}
