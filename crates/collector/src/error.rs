use datastore::StoreError;
use thiserror::Error;
use youtube_client::FeedError;

pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("video {0} has no active live chat")]
    NotLive(String),

    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: FeedError,
    },

    #[error("collection cancelled")]
    Cancelled,

    #[error("invalid page token")]
    InvalidPageToken,
}
