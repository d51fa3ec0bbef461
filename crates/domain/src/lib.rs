use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a video resource as last fetched from the Data API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub channel_id: String,
    pub category_id: String,
    pub title: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub scheduled_end_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    /// Empty once the broadcast has ended
    pub active_live_chat_id: String,
    pub privacy_status: String,
    pub upload_status: String,
    pub embeddable: bool,
    pub last_update: DateTime<Utc>,
}

impl Video {
    /// True while the Data API still reports a chat that can be polled
    pub fn is_live(&self) -> bool {
        !self.active_live_chat_id.is_empty()
    }

    /// A finished broadcast whose chat can only be replayed
    pub fn is_archive(&self) -> bool {
        !self.is_live() && self.actual_end_time.is_some()
    }
}

/// Paid message details attached to a super chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperChat {
    pub amount_micros: u64,
    pub currency: String,
    pub amount_display_string: String,
    pub tier: u32,
}

/// A chat message collected from the live polling API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveLiveChatMessage {
    pub id: String,
    pub channel_id: String,
    pub video_id: String,
    pub author_channel_id: String,
    pub author_display_name: String,
    pub author_profile_image_url: String,
    pub is_chat_moderator: bool,
    pub is_chat_owner: bool,
    pub is_chat_sponsor: bool,
    pub is_verified: bool,
    pub display_message: String,
    pub super_chat: Option<SuperChat>,
    pub published_at: DateTime<Utc>,
    /// Page cursor of the poll response that delivered this message
    pub page_token: String,
    pub last_update: DateTime<Utc>,
}

/// Renderer variant a replayed chat action was decoded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMessageKind {
    Text,
    Paid,
}

impl ArchiveMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveMessageKind::Text => "text",
            ArchiveMessageKind::Paid => "paid",
        }
    }
}

impl fmt::Display for ArchiveMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message reconstructed from a finished broadcast's replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveLiveChatMessage {
    pub unique_id: String,
    pub kind: ArchiveMessageKind,
    pub message_id: String,
    pub channel_id: String,
    pub video_id: String,
    pub client_id: String,
    pub author_external_channel_id: String,
    pub author_name: String,
    pub author_photo_url: String,
    pub message_text: String,
    /// Only set for paid messages
    pub purchase_amount_text: String,
    pub video_offset_time_msec: i64,
    pub timestamp_usec: i64,
    pub last_update: DateTime<Utc>,
}

impl ArchiveLiveChatMessage {
    /// The same message id can appear under both renderer variants, so the
    /// key also carries the kind, timestamp and client id.
    pub fn build_unique_id(
        video_id: &str,
        kind: ArchiveMessageKind,
        message_id: &str,
        timestamp_usec: i64,
        client_id: &str,
    ) -> String {
        format!("{video_id}.{kind}.{message_id}.{timestamp_usec}.{client_id}")
    }
}

/// Which of the two collection flows a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Active,
    Archive,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Active => "active",
            CollectionKind::Archive => "archive",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
