use crate::{Repository, Result, RetentionReport, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use domain::{ActiveLiveChatMessage, ArchiveLiveChatMessage, ArchiveMessageKind, SuperChat, Video};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA_SQL: &str = r"CREATE TABLE IF NOT EXISTS video (
video_id TEXT PRIMARY KEY NOT NULL CHECK (video_id <> ''),
channel_id TEXT NOT NULL,
category_id TEXT NOT NULL,
title TEXT NOT NULL,
description TEXT NOT NULL,
published_at INTEGER,
scheduled_start_time INTEGER,
scheduled_end_time INTEGER,
actual_start_time INTEGER,
actual_end_time INTEGER,
active_live_chat_id TEXT NOT NULL,
privacy_status TEXT NOT NULL,
upload_status TEXT NOT NULL,
embeddable INTEGER NOT NULL,
last_update INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS video_channel_id_index ON video (channel_id);
CREATE INDEX IF NOT EXISTS video_last_update_index ON video (last_update);

CREATE TABLE IF NOT EXISTS active_live_chat_message (
message_id TEXT PRIMARY KEY NOT NULL CHECK (message_id <> ''),
channel_id TEXT NOT NULL,
video_id TEXT NOT NULL,
author_channel_id TEXT NOT NULL,
author_display_name TEXT NOT NULL,
author_profile_image_url TEXT NOT NULL,
is_chat_moderator INTEGER NOT NULL,
is_chat_owner INTEGER NOT NULL,
is_chat_sponsor INTEGER NOT NULL,
is_verified INTEGER NOT NULL,
display_message TEXT NOT NULL,
super_chat_amount_micros INTEGER,
super_chat_currency TEXT,
super_chat_amount_display_string TEXT,
super_chat_tier INTEGER,
published_at INTEGER NOT NULL,
page_token TEXT NOT NULL,
last_update INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS active_live_chat_message_video_id_index ON active_live_chat_message (video_id, published_at);
CREATE INDEX IF NOT EXISTS active_live_chat_message_channel_id_index ON active_live_chat_message (channel_id);
CREATE INDEX IF NOT EXISTS active_live_chat_message_last_update_index ON active_live_chat_message (last_update);

CREATE TABLE IF NOT EXISTS archive_live_chat_message (
unique_id TEXT PRIMARY KEY NOT NULL CHECK (unique_id <> ''),
kind TEXT NOT NULL CHECK (kind IN ('text', 'paid')),
message_id TEXT NOT NULL,
channel_id TEXT NOT NULL,
video_id TEXT NOT NULL,
client_id TEXT NOT NULL,
author_external_channel_id TEXT NOT NULL,
author_name TEXT NOT NULL,
author_photo_url TEXT NOT NULL,
message_text TEXT NOT NULL,
purchase_amount_text TEXT NOT NULL,
video_offset_time_msec INTEGER NOT NULL,
timestamp_usec INTEGER NOT NULL,
last_update INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS archive_live_chat_message_video_id_index ON archive_live_chat_message (video_id, video_offset_time_msec);
CREATE INDEX IF NOT EXISTS archive_live_chat_message_channel_id_index ON archive_live_chat_message (channel_id);
CREATE INDEX IF NOT EXISTS archive_live_chat_message_last_update_index ON archive_live_chat_message (last_update);";

const UPSERT_VIDEO: &str = r"INSERT OR REPLACE INTO video
(video_id, channel_id, category_id, title, description, published_at, scheduled_start_time, scheduled_end_time, actual_start_time, actual_end_time, active_live_chat_id, privacy_status, upload_status, embeddable, last_update)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPSERT_ACTIVE_MESSAGE: &str = r"INSERT OR REPLACE INTO active_live_chat_message
(message_id, channel_id, video_id, author_channel_id, author_display_name, author_profile_image_url, is_chat_moderator, is_chat_owner, is_chat_sponsor, is_verified, display_message, super_chat_amount_micros, super_chat_currency, super_chat_amount_display_string, super_chat_tier, published_at, page_token, last_update)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPSERT_ARCHIVE_MESSAGE: &str = r"INSERT OR REPLACE INTO archive_live_chat_message
(unique_id, kind, message_id, channel_id, video_id, client_id, author_external_channel_id, author_name, author_photo_url, message_text, purchase_amount_text, video_offset_time_msec, timestamp_usec, last_update)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// SQLite-backed repository.
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    /// Open (creating if needed) the database file at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // A single connection serializes batch transactions across pollers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
        tracing::info!(path = %path.display(), "sqlite store ready");

        Ok(Self { pool })
    }
}

/// SQLite reads a negative OFFSET as 0 and a negative LIMIT as unbounded, so
/// bounds beyond `i64::MAX` are resolved here. `None` means no row can match.
fn page_bounds(offset: u64, limit: u64) -> Option<(i64, i64)> {
    let offset = i64::try_from(offset).ok()?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    Some((offset, limit))
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(table: &'static str, millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Corrupt {
            table,
            message: format!("timestamp {millis} out of range"),
        })
}

fn from_optional_millis(table: &'static str, millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis.map(|m| from_millis(table, m)).transpose()
}

fn video_from_row(row: &SqliteRow) -> Result<Video> {
    const TABLE: &str = "video";
    Ok(Video {
        id: row.try_get("video_id")?,
        channel_id: row.try_get("channel_id")?,
        category_id: row.try_get("category_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        published_at: from_optional_millis(TABLE, row.try_get("published_at")?)?,
        scheduled_start_time: from_optional_millis(TABLE, row.try_get("scheduled_start_time")?)?,
        scheduled_end_time: from_optional_millis(TABLE, row.try_get("scheduled_end_time")?)?,
        actual_start_time: from_optional_millis(TABLE, row.try_get("actual_start_time")?)?,
        actual_end_time: from_optional_millis(TABLE, row.try_get("actual_end_time")?)?,
        active_live_chat_id: row.try_get("active_live_chat_id")?,
        privacy_status: row.try_get("privacy_status")?,
        upload_status: row.try_get("upload_status")?,
        embeddable: row.try_get("embeddable")?,
        last_update: from_millis(TABLE, row.try_get("last_update")?)?,
    })
}

fn active_message_from_row(row: &SqliteRow) -> Result<ActiveLiveChatMessage> {
    const TABLE: &str = "active_live_chat_message";
    let amount_micros: Option<i64> = row.try_get("super_chat_amount_micros")?;
    let super_chat = match amount_micros {
        Some(amount_micros) => Some(SuperChat {
            amount_micros: amount_micros as u64,
            currency: row
                .try_get::<Option<String>, _>("super_chat_currency")?
                .unwrap_or_default(),
            amount_display_string: row
                .try_get::<Option<String>, _>("super_chat_amount_display_string")?
                .unwrap_or_default(),
            tier: row
                .try_get::<Option<i64>, _>("super_chat_tier")?
                .unwrap_or_default() as u32,
        }),
        None => None,
    };
    Ok(ActiveLiveChatMessage {
        id: row.try_get("message_id")?,
        channel_id: row.try_get("channel_id")?,
        video_id: row.try_get("video_id")?,
        author_channel_id: row.try_get("author_channel_id")?,
        author_display_name: row.try_get("author_display_name")?,
        author_profile_image_url: row.try_get("author_profile_image_url")?,
        is_chat_moderator: row.try_get("is_chat_moderator")?,
        is_chat_owner: row.try_get("is_chat_owner")?,
        is_chat_sponsor: row.try_get("is_chat_sponsor")?,
        is_verified: row.try_get("is_verified")?,
        display_message: row.try_get("display_message")?,
        super_chat,
        published_at: from_millis(TABLE, row.try_get("published_at")?)?,
        page_token: row.try_get("page_token")?,
        last_update: from_millis(TABLE, row.try_get("last_update")?)?,
    })
}

fn archive_message_from_row(row: &SqliteRow) -> Result<ArchiveLiveChatMessage> {
    const TABLE: &str = "archive_live_chat_message";
    let kind = match row.try_get::<String, _>("kind")?.as_str() {
        "text" => ArchiveMessageKind::Text,
        "paid" => ArchiveMessageKind::Paid,
        other => {
            return Err(StoreError::Corrupt {
                table: TABLE,
                message: format!("unknown message kind '{other}'"),
            });
        }
    };
    Ok(ArchiveLiveChatMessage {
        unique_id: row.try_get("unique_id")?,
        kind,
        message_id: row.try_get("message_id")?,
        channel_id: row.try_get("channel_id")?,
        video_id: row.try_get("video_id")?,
        client_id: row.try_get("client_id")?,
        author_external_channel_id: row.try_get("author_external_channel_id")?,
        author_name: row.try_get("author_name")?,
        author_photo_url: row.try_get("author_photo_url")?,
        message_text: row.try_get("message_text")?,
        purchase_amount_text: row.try_get("purchase_amount_text")?,
        video_offset_time_msec: row.try_get("video_offset_time_msec")?,
        timestamp_usec: row.try_get("timestamp_usec")?,
        last_update: from_millis(TABLE, row.try_get("last_update")?)?,
    })
}

async fn insert_active_messages(
    tx: &mut Transaction<'_, Sqlite>,
    messages: &[ActiveLiveChatMessage],
) -> Result<()> {
    for message in messages {
        let super_chat = message.super_chat.as_ref();
        sqlx::query(UPSERT_ACTIVE_MESSAGE)
            .bind(&message.id)
            .bind(&message.channel_id)
            .bind(&message.video_id)
            .bind(&message.author_channel_id)
            .bind(&message.author_display_name)
            .bind(&message.author_profile_image_url)
            .bind(message.is_chat_moderator)
            .bind(message.is_chat_owner)
            .bind(message.is_chat_sponsor)
            .bind(message.is_verified)
            .bind(&message.display_message)
            .bind(super_chat.map(|s| s.amount_micros as i64))
            .bind(super_chat.map(|s| s.currency.as_str()))
            .bind(super_chat.map(|s| s.amount_display_string.as_str()))
            .bind(super_chat.map(|s| i64::from(s.tier)))
            .bind(to_millis(message.published_at))
            .bind(&message.page_token)
            .bind(to_millis(message.last_update))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn insert_archive_messages(
    tx: &mut Transaction<'_, Sqlite>,
    messages: &[ArchiveLiveChatMessage],
) -> Result<()> {
    for message in messages {
        sqlx::query(UPSERT_ARCHIVE_MESSAGE)
            .bind(&message.unique_id)
            .bind(message.kind.as_str())
            .bind(&message.message_id)
            .bind(&message.channel_id)
            .bind(&message.video_id)
            .bind(&message.client_id)
            .bind(&message.author_external_channel_id)
            .bind(&message.author_name)
            .bind(&message.author_photo_url)
            .bind(&message.message_text)
            .bind(&message.purchase_amount_text)
            .bind(message.video_offset_time_msec)
            .bind(message.timestamp_usec)
            .bind(to_millis(message.last_update))
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_video(&self, id: &str) -> Result<Option<Video>> {
        let row = sqlx::query("SELECT * FROM video WHERE video_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(video_from_row).transpose()
    }

    async fn upsert_video(&self, video: &Video) -> Result<()> {
        sqlx::query(UPSERT_VIDEO)
            .bind(&video.id)
            .bind(&video.channel_id)
            .bind(&video.category_id)
            .bind(&video.title)
            .bind(&video.description)
            .bind(video.published_at.map(to_millis))
            .bind(video.scheduled_start_time.map(to_millis))
            .bind(video.scheduled_end_time.map(to_millis))
            .bind(video.actual_start_time.map(to_millis))
            .bind(video.actual_end_time.map(to_millis))
            .bind(&video.active_live_chat_id)
            .bind(&video.privacy_status)
            .bind(&video.upload_status)
            .bind(video.embeddable)
            .bind(to_millis(video.last_update))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_active_messages(&self, messages: &[ActiveLiveChatMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        if let Err(err) = insert_active_messages(&mut tx, messages).await {
            tx.rollback().await?;
            return Err(err);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_active_messages(
        &self,
        video_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ActiveLiveChatMessage>> {
        let Some((offset, limit)) = page_bounds(offset, limit) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT * FROM active_live_chat_message WHERE video_id = ? \
             ORDER BY published_at, message_id LIMIT ? OFFSET ?",
        )
        .bind(video_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(active_message_from_row).collect()
    }

    async fn count_active_messages(&self, video_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM active_live_chat_message WHERE video_id = ?")
                .bind(video_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn upsert_archive_messages(&self, messages: &[ArchiveLiveChatMessage]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        if let Err(err) = insert_archive_messages(&mut tx, messages).await {
            tx.rollback().await?;
            return Err(err);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_archive_messages(
        &self,
        video_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ArchiveLiveChatMessage>> {
        let Some((offset, limit)) = page_bounds(offset, limit) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            "SELECT * FROM archive_live_chat_message WHERE video_id = ? \
             ORDER BY video_offset_time_msec, unique_id LIMIT ? OFFSET ?",
        )
        .bind(video_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(archive_message_from_row).collect()
    }

    async fn count_archive_messages(&self, video_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM archive_live_chat_message WHERE video_id = ?")
                .bind(video_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<RetentionReport> {
        let cutoff = to_millis(cutoff);
        let mut tx = self.pool.begin().await?;
        let mut report = RetentionReport::default();
        for (table, slot) in [
            ("video", &mut report.videos),
            ("active_live_chat_message", &mut report.active_messages),
            ("archive_live_chat_message", &mut report.archive_messages),
        ] {
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE last_update < ?"))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
            *slot = result.rows_affected();
        }
        tx.commit().await?;
        Ok(report)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
