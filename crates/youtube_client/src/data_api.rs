use crate::extract::de_flexible_u64;
use crate::{ClientConfig, FeedError, LiveChatPage, LiveChatSource, Result, build_http_client};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ActiveLiveChatMessage, SuperChat, Video};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const VIDEO_PARTS: &str = "snippet,liveStreamingDetails,status";
const MESSAGE_PARTS: &str = "snippet,authorDetails";
const MAX_RESULTS: &str = "2000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideosListResponse {
    #[serde(default)]
    pub items: Vec<VideoResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<VideoSnippet>,
    #[serde(default)]
    pub live_streaming_details: Option<LiveStreamingDetails>,
    #[serde(default)]
    pub status: Option<VideoStatus>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSnippet {
    pub published_at: Option<DateTime<Utc>>,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub category_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveStreamingDetails {
    pub active_live_chat_id: Option<String>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub scheduled_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoStatus {
    pub upload_status: String,
    pub privacy_status: String,
    pub embeddable: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageListResponse {
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default, deserialize_with = "de_optional_flexible_u64")]
    pub polling_interval_millis: Option<u64>,
    #[serde(default)]
    pub items: Vec<LiveChatMessageResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageResource {
    pub id: String,
    #[serde(default)]
    pub snippet: LiveChatMessageSnippet,
    #[serde(default)]
    pub author_details: AuthorDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveChatMessageSnippet {
    pub published_at: Option<DateTime<Utc>>,
    pub display_message: String,
    pub super_chat_details: Option<SuperChatDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChatDetails {
    #[serde(deserialize_with = "de_flexible_u64")]
    pub amount_micros: u64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub amount_display_string: String,
    #[serde(default)]
    pub tier: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorDetails {
    pub channel_id: String,
    pub display_name: String,
    pub profile_image_url: String,
    pub is_verified: bool,
    pub is_chat_owner: bool,
    pub is_chat_sponsor: bool,
    pub is_chat_moderator: bool,
}

fn de_optional_flexible_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    de_flexible_u64(deserializer).map(Some)
}

impl VideoResource {
    fn into_video(self, fetched_at: DateTime<Utc>) -> Video {
        let snippet = self.snippet.unwrap_or_default();
        let live = self.live_streaming_details.unwrap_or_default();
        let status = self.status.unwrap_or_default();
        Video {
            id: self.id,
            channel_id: snippet.channel_id,
            category_id: snippet.category_id,
            title: snippet.title,
            description: snippet.description,
            published_at: snippet.published_at,
            scheduled_start_time: live.scheduled_start_time,
            scheduled_end_time: live.scheduled_end_time,
            actual_start_time: live.actual_start_time,
            actual_end_time: live.actual_end_time,
            active_live_chat_id: live.active_live_chat_id.unwrap_or_default(),
            privacy_status: status.privacy_status,
            upload_status: status.upload_status,
            embeddable: status.embeddable,
            last_update: fetched_at,
        }
    }
}

impl LiveChatMessageResource {
    fn into_message(
        self,
        video: &Video,
        page_token: &str,
        fetched_at: DateTime<Utc>,
    ) -> ActiveLiveChatMessage {
        let author = self.author_details;
        let super_chat = self.snippet.super_chat_details.map(|s| SuperChat {
            amount_micros: s.amount_micros,
            currency: s.currency,
            amount_display_string: s.amount_display_string,
            tier: s.tier,
        });
        ActiveLiveChatMessage {
            id: self.id,
            channel_id: video.channel_id.clone(),
            video_id: video.id.clone(),
            author_channel_id: author.channel_id,
            author_display_name: author.display_name,
            author_profile_image_url: author.profile_image_url,
            is_chat_moderator: author.is_chat_moderator,
            is_chat_owner: author.is_chat_owner,
            is_chat_sponsor: author.is_chat_sponsor,
            is_verified: author.is_verified,
            display_message: self.snippet.display_message,
            super_chat,
            published_at: self.snippet.published_at.unwrap_or(fetched_at),
            page_token: page_token.to_string(),
            last_update: fetched_at,
        }
    }
}

/// Client for the key-authenticated Data API
pub struct DataApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DataApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            base_url: config.data_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl LiveChatSource for DataApiClient {
    async fn fetch_video(&self, video_id: &str) -> Result<Option<Video>> {
        let response: VideosListResponse = self
            .get_json("/youtube/v3/videos", &[("part", VIDEO_PARTS), ("id", video_id)])
            .await?;
        let fetched_at = Utc::now();
        Ok(response
            .items
            .into_iter()
            .find(|item| item.id == video_id)
            .map(|item| item.into_video(fetched_at)))
    }

    async fn fetch_messages(&self, video: &Video, page_token: &str) -> Result<LiveChatPage> {
        let mut query = vec![
            ("liveChatId", video.active_live_chat_id.as_str()),
            ("part", MESSAGE_PARTS),
            ("maxResults", MAX_RESULTS),
        ];
        if !page_token.is_empty() {
            query.push(("pageToken", page_token));
        }
        let response: LiveChatMessageListResponse =
            self.get_json("/youtube/v3/liveChat/messages", &query).await?;

        let fetched_at = Utc::now();
        tracing::debug!(
            video_id = %video.id,
            items = response.items.len(),
            "fetched live chat page"
        );
        Ok(LiveChatPage {
            messages: response
                .items
                .into_iter()
                .map(|item| item.into_message(video, page_token, fetched_at))
                .collect(),
            next_page_token: response.next_page_token.unwrap_or_default(),
            polling_interval: response.polling_interval_millis.map(Duration::from_millis),
        })
    }
}
