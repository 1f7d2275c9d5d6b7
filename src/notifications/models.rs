//! Notification data models

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Kind of expiry event a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    ExpiringSoon,
    Expired,
    Disposed,
}

/// A notification about one medicine, as produced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub medicine_id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub medicine_name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default, deserialize_with = "nullable_string")]
    pub message: String,
    pub read: bool,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
}

/// Body of `GET /notifications/unread-count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: u64,
}

#[derive(Debug, Error)]
#[error("Invalid notification payload: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

impl NotificationRecord {
    /// Decode a pushed message body.
    pub fn from_payload(payload: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(payload)?)
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The backend emits local date-times without a zone. Values carrying an
/// offset are accepted too and converted to local time.
mod timestamp {
    use super::*;
    use serde::{de, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub(super) fn parse(raw: &str) -> Option<NaiveDateTime> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, FORMAT) {
            return Some(naive);
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Local).naive_local())
    }
}

#[cfg(test)]
pub(crate) fn test_record(id: &str, read: bool) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        medicine_id: format!("med-{}", id),
        medicine_name: "Ibuprofen".to_string(),
        notification_type: NotificationType::ExpiringSoon,
        message: format!("Ibuprofen expires soon ({})", id),
        read,
        created_at: timestamp::parse("2024-05-01T10:15:30").unwrap(),
    }
}
