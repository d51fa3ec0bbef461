//! Domain records to wire messages.

use crate::proto;
use chrono::{DateTime, SecondsFormat, Utc};
use collector::Outcome;

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn optional_timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map(timestamp).unwrap_or_default()
}

pub(crate) fn status(code: proto::StatusCode, message: impl Into<String>) -> proto::ResponseStatus {
    proto::ResponseStatus {
        code: code as i32,
        message: message.into(),
    }
}

/// Status for the outcome and its payload, if it carried one
pub(crate) fn split<T>(outcome: Outcome<T>) -> (proto::ResponseStatus, Option<T>) {
    match outcome {
        Outcome::Success(value) => (status(proto::StatusCode::Success, "ok"), Some(value)),
        Outcome::InProgress => (
            status(proto::StatusCode::InProgress, "collection in progress"),
            None,
        ),
        Outcome::NotFound(message) => (status(proto::StatusCode::NotFound, message), None),
        Outcome::InternalError(message) => {
            (status(proto::StatusCode::InternalError, message), None)
        }
    }
}

impl From<domain::Video> for proto::Video {
    fn from(video: domain::Video) -> Self {
        Self {
            id: video.id,
            channel_id: video.channel_id,
            category_id: video.category_id,
            title: video.title,
            description: video.description,
            published_at: optional_timestamp(video.published_at),
            scheduled_start_time: optional_timestamp(video.scheduled_start_time),
            scheduled_end_time: optional_timestamp(video.scheduled_end_time),
            actual_start_time: optional_timestamp(video.actual_start_time),
            actual_end_time: optional_timestamp(video.actual_end_time),
            active_live_chat_id: video.active_live_chat_id,
            privacy_status: video.privacy_status,
            upload_status: video.upload_status,
            embeddable: video.embeddable,
            last_update: timestamp(video.last_update),
        }
    }
}

impl From<&domain::ActiveLiveChatMessage> for proto::ActiveLiveChatMessage {
    fn from(message: &domain::ActiveLiveChatMessage) -> Self {
        Self {
            id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            video_id: message.video_id.clone(),
            author_channel_id: message.author_channel_id.clone(),
            author_display_name: message.author_display_name.clone(),
            author_profile_image_url: message.author_profile_image_url.clone(),
            is_chat_moderator: message.is_chat_moderator,
            is_chat_owner: message.is_chat_owner,
            is_chat_sponsor: message.is_chat_sponsor,
            is_verified: message.is_verified,
            display_message: message.display_message.clone(),
            super_chat: message.super_chat.as_ref().map(|sc| proto::SuperChat {
                amount_micros: sc.amount_micros,
                currency: sc.currency.clone(),
                amount_display_string: sc.amount_display_string.clone(),
                tier: sc.tier,
            }),
            published_at: timestamp(message.published_at),
            page_token: message.page_token.clone(),
            last_update: timestamp(message.last_update),
        }
    }
}

impl From<domain::ArchiveLiveChatMessage> for proto::ArchiveLiveChatMessage {
    fn from(message: domain::ArchiveLiveChatMessage) -> Self {
        Self {
            unique_id: message.unique_id,
            kind: message.kind.as_str().to_string(),
            message_id: message.message_id,
            channel_id: message.channel_id,
            video_id: message.video_id,
            client_id: message.client_id,
            author_external_channel_id: message.author_external_channel_id,
            author_name: message.author_name,
            author_photo_url: message.author_photo_url,
            message_text: message.message_text,
            purchase_amount_text: message.purchase_amount_text,
            video_offset_time_msec: message.video_offset_time_msec,
            timestamp_usec: message.timestamp_usec,
            last_update: timestamp(message.last_update),
        }
    }
}

impl From<proto::CollectionKind> for domain::CollectionKind {
    fn from(kind: proto::CollectionKind) -> Self {
        match kind {
            proto::CollectionKind::Active => domain::CollectionKind::Active,
            proto::CollectionKind::Archive => domain::CollectionKind::Archive,
        }
    }
}
