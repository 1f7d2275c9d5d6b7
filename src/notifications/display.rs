//! Text rendering for the badge and the alert list.

use chrono::{Local, NaiveDateTime};

use super::models::{NotificationRecord, NotificationType};

const BADGE_MAX: u64 = 9;

/// Label for the unread badge, `None` when it should be hidden.
pub fn badge_label(unread: u64) -> Option<String> {
    match unread {
        0 => None,
        n if n > BADGE_MAX => Some(format!("{}+", BADGE_MAX)),
        n => Some(n.to_string()),
    }
}

pub fn type_icon(notification_type: NotificationType) -> &'static str {
    match notification_type {
        NotificationType::Expired => "⚠️",
        NotificationType::ExpiringSoon => "🕐",
        NotificationType::Disposed => "🗑️",
    }
}

/// Current wall-clock time in the same zone-less local form as `created_at`.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Human friendly age of `created_at` relative to `now`.
pub fn relative_age(created_at: NaiveDateTime, now: NaiveDateTime) -> String {
    let elapsed = now.signed_duration_since(created_at);
    if elapsed.num_minutes() < 1 {
        return "just now".to_string();
    }
    if elapsed.num_hours() < 1 {
        return format!("{}m ago", elapsed.num_minutes());
    }
    if elapsed.num_days() < 1 {
        return format!("{}h ago", elapsed.num_hours());
    }
    if elapsed.num_days() < 7 {
        return format!("{}d ago", elapsed.num_days());
    }
    created_at.format("%Y-%m-%d").to_string()
}

/// One line of the alert list.
pub fn alert_line(record: &NotificationRecord, now: NaiveDateTime) -> String {
    let marker = if record.read { " " } else { "●" };
    format!(
        "{} {} {}  ({}, id {})",
        marker,
        type_icon(record.notification_type),
        record.message,
        relative_age(record.created_at, now),
        record.id
    )
}
