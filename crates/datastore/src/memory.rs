use crate::{Repository, Result, RetentionReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ActiveLiveChatMessage, ArchiveLiveChatMessage, Video};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory implementation of the Repository trait
///
/// Nothing survives a restart. Used when the configured database path is
/// `:memory:` and as the store behind collector tests.
#[derive(Default)]
pub struct InMemoryRepository {
    videos: Arc<RwLock<HashMap<String, Video>>>,
    active_messages: Arc<RwLock<HashMap<String, ActiveLiveChatMessage>>>,
    archive_messages: Arc<RwLock<HashMap<String, ArchiveLiveChatMessage>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn page<T>(mut rows: Vec<T>, offset: u64, limit: u64) -> Vec<T> {
    let start = (offset as usize).min(rows.len());
    let end = start.saturating_add(limit as usize).min(rows.len());
    rows.truncate(end);
    rows.split_off(start)
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_video(&self, id: &str) -> Result<Option<Video>> {
        Ok(read(&self.videos).get(id).cloned())
    }

    async fn upsert_video(&self, video: &Video) -> Result<()> {
        write(&self.videos).insert(video.id.clone(), video.clone());
        Ok(())
    }

    async fn upsert_active_messages(&self, messages: &[ActiveLiveChatMessage]) -> Result<()> {
        let mut store = write(&self.active_messages);
        for message in messages {
            store.insert(message.id.clone(), message.clone());
        }
        Ok(())
    }

    async fn get_active_messages(
        &self,
        video_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ActiveLiveChatMessage>> {
        let mut rows: Vec<ActiveLiveChatMessage> = read(&self.active_messages)
            .values()
            .filter(|m| m.video_id == video_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.published_at, &a.id).cmp(&(b.published_at, &b.id)));
        Ok(page(rows, offset, limit))
    }

    async fn count_active_messages(&self, video_id: &str) -> Result<u64> {
        Ok(read(&self.active_messages)
            .values()
            .filter(|m| m.video_id == video_id)
            .count() as u64)
    }

    async fn upsert_archive_messages(&self, messages: &[ArchiveLiveChatMessage]) -> Result<()> {
        let mut store = write(&self.archive_messages);
        for message in messages {
            store.insert(message.unique_id.clone(), message.clone());
        }
        Ok(())
    }

    async fn get_archive_messages(
        &self,
        video_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ArchiveLiveChatMessage>> {
        let mut rows: Vec<ArchiveLiveChatMessage> = read(&self.archive_messages)
            .values()
            .filter(|m| m.video_id == video_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.video_offset_time_msec, &a.unique_id).cmp(&(b.video_offset_time_msec, &b.unique_id))
        });
        Ok(page(rows, offset, limit))
    }

    async fn count_archive_messages(&self, video_id: &str) -> Result<u64> {
        Ok(read(&self.archive_messages)
            .values()
            .filter(|m| m.video_id == video_id)
            .count() as u64)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<RetentionReport> {
        fn sweep<T>(
            lock: &RwLock<HashMap<String, T>>,
            last_update: impl Fn(&T) -> DateTime<Utc>,
            cutoff: DateTime<Utc>,
        ) -> u64 {
            let mut store = write(lock);
            let before = store.len();
            store.retain(|_, row| last_update(row) >= cutoff);
            (before - store.len()) as u64
        }

        Ok(RetentionReport {
            videos: sweep(&self.videos, |v| v.last_update, cutoff),
            active_messages: sweep(&self.active_messages, |m| m.last_update, cutoff),
            archive_messages: sweep(&self.archive_messages, |m| m.last_update, cutoff),
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
