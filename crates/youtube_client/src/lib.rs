//! Clients for the two upstream chat feeds.
//!
//! [`DataApiClient`] talks to the key-authenticated Data API (video metadata
//! and live chat polling). [`ReplayClient`] scrapes the public watch page and
//! drives the internal replay endpoint for finished broadcasts.

use async_trait::async_trait;
use domain::{ActiveLiveChatMessage, Video};
use std::time::Duration;

pub mod data_api;
pub mod error;
mod extract;
pub mod replay;

pub use data_api::DataApiClient;
pub use error::{FeedError, Result};
pub use replay::{
    ChatItem, ChatMessage, ClientContext, ReplayAction, ReplayChunk, ReplayClient, ReplaySession,
    SessionFingerprint,
};

pub const DEFAULT_DATA_API_BASE_URL: &str = "https://www.googleapis.com";
pub const DEFAULT_WEB_BASE_URL: &str = "https://www.youtube.com";

/// Browser identity sent with page scrapes; the watch page omits the chat
/// continuation for unknown agents.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Connection settings shared by both clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub data_api_base_url: String,
    pub web_base_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            data_api_base_url: DEFAULT_DATA_API_BASE_URL.to_string(),
            web_base_url: DEFAULT_WEB_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// One page of the live polling API
#[derive(Debug, Clone, Default)]
pub struct LiveChatPage {
    pub messages: Vec<ActiveLiveChatMessage>,
    pub next_page_token: String,
    /// Server-requested wait before the next poll, if it sent one
    pub polling_interval: Option<Duration>,
}

/// Source of video metadata and live chat pages
#[async_trait]
pub trait LiveChatSource: Send + Sync {
    /// `None` when the Data API does not know the video
    async fn fetch_video(&self, video_id: &str) -> Result<Option<Video>>;

    /// Poll one page of chat for a live video, continuing from `page_token`
    async fn fetch_messages(&self, video: &Video, page_token: &str) -> Result<LiveChatPage>;
}

/// Source of replayed chat for finished broadcasts
#[async_trait]
pub trait ReplaySource: Send + Sync {
    /// Scrape the watch and replay pages for the first continuation and the
    /// session fingerprint. `None` means there is no replay to collect.
    async fn seed(&self, video_id: &str) -> Result<Option<ReplaySession>>;

    /// Fetch the chunk that follows `continuation`
    async fn fetch_chunk(
        &self,
        session: &ReplaySession,
        continuation: &str,
        player_offset_ms: i64,
    ) -> Result<ReplayChunk>;
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(DESKTOP_USER_AGENT)
        .build()?)
}
