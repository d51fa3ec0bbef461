//! Entry point for every external request.
//!
//! Start operations claim a ticket, resolve the video, and hand the ticket
//! to a background task, which releases it when it finishes. Read
//! operations refuse to serve a video while a collection for it runs.

use crate::active::ActivePoller;
use crate::archive::ArchiveScraper;
use crate::hub::{HubHandle, Subscription};
use crate::registry::{CollectionRegistry, Ticket};
use crate::{CollectorConfig, CollectorError};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use datastore::{Repository, RetentionReport};
use domain::{ActiveLiveChatMessage, ArchiveLiveChatMessage, CollectionKind, Video};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};
use youtube_client::{LiveChatSource, ReplaySource};

/// Result of an orchestrator call, one variant per response status
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    /// A collection for the video is already running
    InProgress,
    NotFound(String),
    InternalError(String),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// One page of cached live messages
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePage {
    pub messages: Vec<ActiveLiveChatMessage>,
    /// Empty on the last page
    pub next_page_token: String,
}

pub struct Orchestrator {
    registry: CollectionRegistry,
    hub: HubHandle,
    repo: Arc<dyn Repository>,
    live: Arc<dyn LiveChatSource>,
    replay: Arc<dyn ReplaySource>,
    config: CollectorConfig,
}

impl Orchestrator {
    /// Must be called inside a tokio runtime; the broadcast hub is spawned here.
    pub fn new(
        repo: Arc<dyn Repository>,
        live: Arc<dyn LiveChatSource>,
        replay: Arc<dyn ReplaySource>,
        config: CollectorConfig,
    ) -> Self {
        let (hub, _task) = HubHandle::spawn(config.subscriber_buffer);
        Self {
            registry: CollectionRegistry::new(),
            hub,
            repo,
            live,
            replay,
            config,
        }
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Fresh metadata from the Data API, falling back to the stored copy
    /// when the upstream call fails.
    pub async fn get_video(&self, video_id: &str) -> Outcome<Video> {
        match self.live.fetch_video(video_id).await {
            Ok(Some(video)) => {
                if let Err(err) = self.repo.upsert_video(&video).await {
                    warn!(%video_id, error = %err, "failed to store video");
                }
                Outcome::Success(video)
            }
            Ok(None) => Outcome::NotFound(format!("video {video_id} not found")),
            Err(err) => match self.repo.get_video(video_id).await {
                Ok(Some(video)) => {
                    warn!(%video_id, error = %err, "serving stored video, upstream failed");
                    Outcome::Success(video)
                }
                _ => Outcome::InternalError(err.to_string()),
            },
        }
    }

    pub async fn start_active_collection(&self, video_id: &str) -> Outcome<Video> {
        let Some(ticket) = self.registry.try_register(video_id, CollectionKind::Active) else {
            return Outcome::InProgress;
        };
        let video = match self.resolve(&ticket).await {
            Ok(video) => video,
            Err(outcome) => return outcome,
        };
        if !video.is_live() {
            return Outcome::NotFound(format!("video {video_id} has no active live chat"));
        }

        let poller = ActivePoller::new(
            self.live.clone(),
            self.repo.clone(),
            self.hub.clone(),
            self.config.poll_fallback_interval,
        );
        let span = info_span!("active_poller", video_id = %video.id);
        info!(video_id = %video.id, "starting live chat collection");
        tokio::spawn(poller.run(ticket, video.clone()).instrument(span));
        Outcome::Success(video)
    }

    /// Receive batches published for `video_id` from now on
    pub fn subscribe_active(&self, video_id: &str) -> Subscription {
        self.hub.subscribe(video_id)
    }

    pub fn unsubscribe_active(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub async fn subscriber_count(&self, video_id: &str) -> usize {
        self.hub.subscriber_count(video_id).await
    }

    pub async fn get_cached_active(&self, video_id: &str, page_token: &str) -> Outcome<ActivePage> {
        if self.registry.is_registered(video_id, CollectionKind::Active) {
            return Outcome::InProgress;
        }
        let offset = match decode_page_token(page_token) {
            Ok(offset) => offset,
            Err(err) => return Outcome::InternalError(err.to_string()),
        };
        let size = self.config.cached_page_size.max(1);
        // One extra row tells whether another page follows
        let fetched = self
            .repo
            .get_active_messages(video_id, offset, size.saturating_add(1))
            .await;
        let mut messages = match fetched {
            Ok(messages) => messages,
            Err(err) => return Outcome::InternalError(err.to_string()),
        };
        let next_page_token = match offset.checked_add(size) {
            Some(next) if messages.len() as u64 > size => {
                messages.truncate(size as usize);
                encode_page_token(next)
            }
            _ => String::new(),
        };
        Outcome::Success(ActivePage {
            messages,
            next_page_token,
        })
    }

    /// Unless `replace` is set, a video that already has stored replay
    /// messages is reported as accepted without scraping again.
    pub async fn start_archive_collection(&self, video_id: &str, replace: bool) -> Outcome<Video> {
        let Some(ticket) = self.registry.try_register(video_id, CollectionKind::Archive) else {
            return Outcome::InProgress;
        };
        let video = match self.resolve(&ticket).await {
            Ok(video) => video,
            Err(outcome) => return outcome,
        };
        if !video.is_archive() {
            return Outcome::NotFound(format!("video {video_id} is not an archived broadcast"));
        }
        if !replace {
            match self.repo.count_archive_messages(video_id).await {
                Ok(0) => {}
                Ok(count) => {
                    info!(%video_id, count, "archive already collected");
                    return Outcome::Success(video);
                }
                Err(err) => return Outcome::InternalError(err.to_string()),
            }
        }

        let scraper = ArchiveScraper::new(
            self.replay.clone(),
            self.repo.clone(),
            self.config.archive_max_retries,
            self.config.archive_retry_delay,
        );
        let span = info_span!("archive_scraper", video_id = %video.id);
        info!(video_id = %video.id, replace, "starting archive collection");
        tokio::spawn(scraper.run(ticket, video.clone()).instrument(span));
        Outcome::Success(video)
    }

    /// A page of replayed messages ordered by video offset. `count` of zero
    /// uses the configured page size.
    pub async fn get_archive_live_chat(
        &self,
        video_id: &str,
        offset: u64,
        count: u64,
    ) -> Outcome<Vec<ArchiveLiveChatMessage>> {
        if self.registry.is_registered(video_id, CollectionKind::Archive) {
            return Outcome::InProgress;
        }
        let count = if count == 0 {
            self.config.cached_page_size
        } else {
            count
        };
        match self.repo.get_archive_messages(video_id, offset, count).await {
            Ok(messages) if messages.is_empty() => {
                Outcome::NotFound(format!("no archived chat stored for video {video_id}"))
            }
            Ok(messages) => Outcome::Success(messages),
            Err(err) => Outcome::InternalError(err.to_string()),
        }
    }

    /// Cancel a running collection. Returns false when none was running.
    pub fn stop_collection(&self, video_id: &str, kind: CollectionKind) -> bool {
        let stopped = self.registry.cancel(video_id, kind);
        if stopped {
            info!(%video_id, %kind, "collection stop requested");
        }
        stopped
    }

    pub async fn sweep_retention(&self, cutoff: DateTime<Utc>) -> crate::Result<RetentionReport> {
        let report = self.repo.delete_older_than(cutoff).await?;
        info!(
            %cutoff,
            videos = report.videos,
            active_messages = report.active_messages,
            archive_messages = report.archive_messages,
            "retention sweep finished"
        );
        Ok(report)
    }

    /// Cancel every running collection
    pub fn shutdown(&self) {
        info!(running = self.registry.active_count(), "cancelling collections");
        self.registry.cancel_all();
    }

    /// Fetch and store the ticket's video. The error side is the outcome to
    /// return; the ticket is released when the caller drops it.
    async fn resolve<T>(&self, ticket: &Ticket) -> Result<Video, Outcome<T>> {
        let video_id = ticket.video_id();
        let video = match self.live.fetch_video(video_id).await {
            Ok(Some(video)) => video,
            Ok(None) => return Err(Outcome::NotFound(format!("video {video_id} not found"))),
            Err(err) => return Err(Outcome::InternalError(err.to_string())),
        };
        if let Err(err) = self.repo.upsert_video(&video).await {
            return Err(Outcome::InternalError(err.to_string()));
        }
        Ok(video)
    }
}

fn encode_page_token(offset: u64) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

/// Offsets are capped at `i64::MAX`, the largest row offset a store accepts.
fn decode_page_token(token: &str) -> crate::Result<u64> {
    if token.is_empty() {
        return Ok(0);
    }
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| CollectorError::InvalidPageToken)?;
    std::str::from_utf8(&raw)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or(CollectorError::InvalidPageToken)
}
