use chrono::{DateTime, Utc};

use crate::common::types::{Message, UserId};

/// "just now", "5 minutes ago", "2 days ago".
pub fn format_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(then).num_seconds().max(0);
    let (amount, unit) = match seconds {
        0..=59 => return "just now".to_string(),
        60..=3_599 => (seconds / 60, "minute"),
        3_600..=86_399 => (seconds / 3_600, "hour"),
        86_400..=604_799 => (seconds / 86_400, "day"),
        604_800..=2_591_999 => (seconds / 604_800, "week"),
        2_592_000..=31_535_999 => (seconds / 2_592_000, "month"),
        _ => (seconds / 31_536_000, "year"),
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{amount} {unit}{plural} ago")
}

/// One terminal line per message part.
pub fn render(message: &Message, current_user: &UserId, now: DateTime<Utc>) -> Vec<String> {
    let who = if &message.sender_id == current_user {
        "you".to_string()
    } else {
        message.sender_id.to_string()
    };
    let when = format_ago(message.created_at, now);

    let mut lines = Vec::new();
    if let Some(url) = &message.image_url {
        lines.push(format!("{who} [image] {url} ({when})"));
    }
    if let Some(text) = &message.text {
        lines.push(format!("{who}: {text} ({when})"));
    }
    if let Some(url) = &message.audio_url {
        lines.push(format!("{who} [audio] {url} ({when})"));
    }
    lines
}
