//! In-app notification records and badge rendering.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{utc_timestamp, EntityId, Timestamp};

/// How often the unread count and feed are refreshed while signed in.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Number of notifications shown in the feed.
pub const DEFAULT_FEED_LIMIT: u32 = 5;

/// Counts above this are rendered as `"9+"`.
pub const BADGE_OVERFLOW_THRESHOLD: u64 = 9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    #[serde(rename = "type", default)]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(with = "utc_timestamp")]
    pub created_at: Timestamp,
}

/// Body of `GET /notifications/unread-count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

/// Badge text for an unread count: hidden at zero, `"9+"` above nine.
pub fn badge_label(count: u64) -> Option<String> {
    match count {
        0 => None,
        n if n > BADGE_OVERFLOW_THRESHOLD => Some(format!("{BADGE_OVERFLOW_THRESHOLD}+")),
        n => Some(n.to_string()),
    }
}
