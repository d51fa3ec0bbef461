//! Replay scraping for finished broadcasts.
//!
//! Seeding reads the watch page for the first replay continuation, then the
//! replay page for the session fingerprint (`ytcfg`) and the continuation to
//! page from (`ytInitialData`). Paging POSTs that continuation to the
//! internal `get_live_chat_replay` endpoint and decodes each chat item into
//! a [`ChatItem`] once, at this boundary.

use crate::extract::{de_flexible_i64, find_replay_continuation, object_after, ytcfg_objects};
use crate::{ClientConfig, FeedError, ReplaySource, Result, build_http_client};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Client block of the innertube context, echoed back on every replay request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientContext {
    pub client_name: String,
    pub client_version: String,
    pub visitor_data: String,
    pub hl: String,
    pub gl: String,
    pub platform: String,
    pub user_agent: String,
    pub os_name: String,
    pub os_version: String,
    pub browser_name: String,
    pub browser_version: String,
    pub client_form_factor: String,
    pub original_url: String,
    pub time_zone: String,
    pub utc_offset_minutes: i32,
}

/// Parameters the replay endpoint expects to accompany each paging request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFingerprint {
    pub api_key: String,
    pub client: ClientContext,
}

/// Everything seeding produces: where paging starts and who is asking
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySession {
    pub continuation: String,
    pub fingerprint: SessionFingerprint,
}

/// Fields shared by both renderer variants
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub author_name: String,
    pub author_photo_url: String,
    pub author_external_channel_id: String,
    pub text: String,
    pub timestamp_usec: i64,
}

/// A replayed chat item, tagged by the renderer it came from
#[derive(Debug, Clone, PartialEq)]
pub enum ChatItem {
    Paid {
        message: ChatMessage,
        purchase_amount_text: String,
    },
    Text(ChatMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayAction {
    pub client_id: String,
    pub video_offset_time_msec: i64,
    pub item: ChatItem,
}

/// One page of replayed chat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayChunk {
    pub actions: Vec<ReplayAction>,
    /// Empty once the archive is exhausted
    pub continuation: String,
    /// Offset of the last replay action in the page, including ones that
    /// carried no chat item
    pub last_video_offset_ms: Option<i64>,
}

// Wire shapes of the replay response. Everything is optional upstream.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReplayResponse {
    continuation_contents: Option<ContinuationContents>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContinuationContents {
    live_chat_continuation: Option<LiveChatContinuation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LiveChatContinuation {
    continuations: Vec<ContinuationEntry>,
    actions: Vec<RawAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ContinuationEntry {
    live_chat_replay_continuation_data: Option<ContinuationData>,
    reload_continuation_data: Option<ContinuationData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContinuationData {
    continuation: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawAction {
    replay_chat_item_action: Option<ReplayChatItemAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReplayChatItemAction {
    actions: Vec<InnerAction>,
    video_offset_time_msec: Option<FlexibleI64>,
}

#[derive(Debug, Deserialize)]
struct FlexibleI64(#[serde(deserialize_with = "de_flexible_i64")] i64);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InnerAction {
    add_chat_item_action: Option<AddChatItemAction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AddChatItemAction {
    item: RawItem,
    client_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawItem {
    live_chat_paid_message_renderer: Option<MessageRenderer>,
    live_chat_text_message_renderer: Option<MessageRenderer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MessageRenderer {
    id: String,
    message: Option<Runs>,
    author_name: Option<SimpleText>,
    author_photo: Option<Thumbnails>,
    author_external_channel_id: String,
    timestamp_usec: Option<FlexibleI64>,
    purchase_amount_text: Option<SimpleText>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SimpleText {
    simple_text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnails {
    thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Runs {
    runs: Vec<Run>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Run {
    text: Option<String>,
    emoji: Option<Emoji>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Emoji {
    emoji_id: String,
    shortcuts: Vec<String>,
}

impl Runs {
    fn flatten(&self) -> String {
        self.runs
            .iter()
            .map(|run| match (&run.text, &run.emoji) {
                (Some(text), _) => text.as_str(),
                (None, Some(emoji)) => emoji
                    .shortcuts
                    .first()
                    .map(String::as_str)
                    .unwrap_or(emoji.emoji_id.as_str()),
                (None, None) => "",
            })
            .collect()
    }
}

impl MessageRenderer {
    fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            author_name: self.author_name.map(|n| n.simple_text).unwrap_or_default(),
            author_photo_url: self
                .author_photo
                .and_then(|p| p.thumbnails.into_iter().last())
                .map(|t| t.url)
                .unwrap_or_default(),
            author_external_channel_id: self.author_external_channel_id,
            text: self.message.map(|m| m.flatten()).unwrap_or_default(),
            timestamp_usec: self.timestamp_usec.map(|t| t.0).unwrap_or_default(),
        }
    }
}

impl RawItem {
    /// Paid wins when both renderers are present
    fn into_chat_item(self) -> Option<ChatItem> {
        if let Some(mut paid) = self.live_chat_paid_message_renderer {
            let purchase_amount_text = paid
                .purchase_amount_text
                .take()
                .map(|t| t.simple_text)
                .unwrap_or_default();
            return Some(ChatItem::Paid {
                message: paid.into_message(),
                purchase_amount_text,
            });
        }
        self.live_chat_text_message_renderer
            .map(|text| ChatItem::Text(text.into_message()))
    }
}

impl LiveChatContinuation {
    fn next_continuation(&self) -> String {
        self.continuations
            .iter()
            .find_map(|entry| {
                entry
                    .live_chat_replay_continuation_data
                    .as_ref()
                    .or(entry.reload_continuation_data.as_ref())
            })
            .map(|data| data.continuation.clone())
            .unwrap_or_default()
    }
}

/// Decode a replay response body into a chunk.
pub fn parse_replay_chunk(body: &str) -> Result<ReplayChunk> {
    let response: ReplayResponse = serde_json::from_str(body)?;
    let Some(contents) = response
        .continuation_contents
        .and_then(|c| c.live_chat_continuation)
    else {
        // No continuation block at all: the archive has been read to the end.
        return Ok(ReplayChunk::default());
    };

    let continuation = contents.next_continuation();
    let mut last_video_offset_ms = None;
    let mut actions = Vec::new();
    for raw in contents.actions {
        let Some(replay) = raw.replay_chat_item_action else {
            continue;
        };
        let offset = replay.video_offset_time_msec.map(|o| o.0);
        if offset.is_some() {
            last_video_offset_ms = offset;
        }
        for inner in replay.actions {
            let Some(add) = inner.add_chat_item_action else {
                continue;
            };
            if let Some(item) = add.item.into_chat_item() {
                actions.push(ReplayAction {
                    client_id: add.client_id,
                    video_offset_time_msec: offset.unwrap_or_default(),
                    item,
                });
            }
        }
    }

    Ok(ReplayChunk {
        actions,
        continuation,
        last_video_offset_ms,
    })
}

#[derive(Deserialize)]
struct YtCfg {
    #[serde(rename = "INNERTUBE_API_KEY")]
    api_key: String,
    #[serde(rename = "INNERTUBE_CONTEXT", default)]
    context: InnertubeContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InnertubeContext {
    client: ClientContext,
}

/// Session fingerprint from the `ytcfg.set` payload that carries the API key.
/// `Ok(None)` when no such payload exists on the page.
pub fn parse_fingerprint(html: &str) -> Result<Option<SessionFingerprint>> {
    let Some(cfg) = ytcfg_objects(html)
        .into_iter()
        .find(|value| value.get("INNERTUBE_API_KEY").is_some())
    else {
        return Ok(None);
    };
    let cfg: YtCfg = serde_json::from_value(cfg)?;
    Ok(Some(SessionFingerprint {
        api_key: cfg.api_key,
        client: cfg.context.client,
    }))
}

/// First continuation from the replay page's `ytInitialData`.
/// `Ok(None)` when the page carries no initial data.
pub fn parse_initial_continuation(html: &str) -> Result<Option<String>> {
    let Some(raw) = object_after(html, "ytInitialData") else {
        return Ok(None);
    };
    let chunk = parse_replay_chunk(raw)?;
    Ok(Some(chunk.continuation).filter(|c| !c.is_empty()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayRequest<'a> {
    context: RequestContext<'a>,
    continuation: &'a str,
    current_player_state: PlayerState,
}

#[derive(Serialize)]
struct RequestContext<'a> {
    client: &'a ClientContext,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerState {
    player_offset_ms: String,
}

/// Client for the replay scraping flow
pub struct ReplayClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReplayClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config.timeout)?,
            base_url: config.web_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_page(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ReplaySource for ReplayClient {
    async fn seed(&self, video_id: &str) -> Result<Option<ReplaySession>> {
        let watch = self
            .get_page(&format!("{}/watch?v={}", self.base_url, video_id))
            .await?;
        let Some(seed) = find_replay_continuation(&watch) else {
            tracing::info!(video_id, "watch page has no replay chat");
            return Ok(None);
        };

        let replay = self
            .get_page(&format!(
                "{}/live_chat_replay?continuation={}",
                self.base_url, seed
            ))
            .await?;
        let (Some(continuation), Some(fingerprint)) = (
            parse_initial_continuation(&replay)?,
            parse_fingerprint(&replay)?,
        ) else {
            tracing::info!(video_id, "replay page has no embedded chat data");
            return Ok(None);
        };

        Ok(Some(ReplaySession {
            continuation,
            fingerprint,
        }))
    }

    async fn fetch_chunk(
        &self,
        session: &ReplaySession,
        continuation: &str,
        player_offset_ms: i64,
    ) -> Result<ReplayChunk> {
        let url = format!("{}/youtubei/v1/live_chat/get_live_chat_replay", self.base_url);
        let request = ReplayRequest {
            context: RequestContext {
                client: &session.fingerprint.client,
            },
            continuation,
            current_player_state: PlayerState {
                player_offset_ms: player_offset_ms.to_string(),
            },
        };

        let resp = self
            .client
            .post(&url)
            .query(&[
                ("key", session.fingerprint.api_key.as_str()),
                ("prettyPrint", "false"),
            ])
            .json(&request)
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
        parse_replay_chunk(&body)
    }
}
