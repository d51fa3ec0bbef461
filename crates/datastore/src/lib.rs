use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ActiveLiveChatMessage, ArchiveLiveChatMessage, Video};

pub mod error;
mod memory;
mod sqlite;

pub use error::{Result, StoreError};
pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

/// Number of rows removed by a retention sweep, per collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub videos: u64,
    pub active_messages: u64,
    pub archive_messages: u64,
}

/// Repository trait for data access abstraction
/// This allows switching between different storage backends (in-memory, SQLite)
#[async_trait]
pub trait Repository: Send + Sync {
    /// Get a video by ID
    async fn get_video(&self, id: &str) -> Result<Option<Video>>;

    /// Insert or overwrite a video
    async fn upsert_video(&self, video: &Video) -> Result<()>;

    /// Upsert a batch of live messages. The batch is written atomically:
    /// either every row lands or none does.
    async fn upsert_active_messages(&self, messages: &[ActiveLiveChatMessage]) -> Result<()>;

    /// Live messages of a video in publish order, starting at `offset`
    async fn get_active_messages(
        &self,
        video_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ActiveLiveChatMessage>>;

    async fn count_active_messages(&self, video_id: &str) -> Result<u64>;

    /// Upsert a batch of replayed messages atomically
    async fn upsert_archive_messages(&self, messages: &[ArchiveLiveChatMessage]) -> Result<()>;

    /// Replayed messages of a video ordered by video offset, starting at `offset`
    async fn get_archive_messages(
        &self,
        video_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ArchiveLiveChatMessage>>;

    async fn count_archive_messages(&self, video_id: &str) -> Result<u64>;

    /// Delete every row whose last update is older than `cutoff`
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<RetentionReport>;

    /// Check the backend answers queries
    async fn health_check(&self) -> Result<()>;
}
