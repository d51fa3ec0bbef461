//! Polling loop for a live broadcast's chat.

use crate::hub::HubHandle;
use crate::registry::Ticket;
use crate::{CollectorError, Result};
use datastore::Repository;
use domain::Video;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use youtube_client::{LiveChatPage, LiveChatSource};

/// Polls one video until cancelled or an error occurs. Every page is
/// persisted before its messages are published.
pub struct ActivePoller {
    source: Arc<dyn LiveChatSource>,
    repo: Arc<dyn Repository>,
    hub: HubHandle,
    fallback_interval: Duration,
}

impl ActivePoller {
    pub fn new(
        source: Arc<dyn LiveChatSource>,
        repo: Arc<dyn Repository>,
        hub: HubHandle,
        fallback_interval: Duration,
    ) -> Self {
        Self {
            source,
            repo,
            hub,
            fallback_interval,
        }
    }

    /// Run to completion. Subscribers get [`crate::LiveUpdate::Ended`] on
    /// cancellation and [`crate::LiveUpdate::Failed`] on error. The ticket
    /// is released either way.
    pub async fn run(self, ticket: Ticket, video: Video) -> Result<()> {
        match self.poll(&ticket, &video).await {
            Ok(polls) => {
                info!(video_id = %video.id, polls, "live chat collection stopped");
                self.hub.publish_end(&video.id);
                Ok(())
            }
            Err(err) => {
                error!(video_id = %video.id, error = %err, "live chat collection failed");
                self.hub.publish_failure(&video.id, err.to_string());
                Err(err)
            }
        }
    }

    async fn poll(&self, ticket: &Ticket, video: &Video) -> Result<u64> {
        if !video.is_live() {
            return Err(CollectorError::NotLive(video.id.clone()));
        }
        let cancel = ticket.cancellation_token();
        let mut page_token = String::new();
        let mut polls = 0u64;

        loop {
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(polls),
                page = self.source.fetch_messages(video, &page_token) => page?,
            };
            polls += 1;

            let LiveChatPage {
                messages,
                next_page_token,
                polling_interval,
            } = page;
            self.repo.upsert_active_messages(&messages).await?;
            debug!(video_id = %video.id, count = messages.len(), "persisted live chat page");
            self.hub.publish_messages(&video.id, messages);

            let wait = polling_interval
                .filter(|interval| !interval.is_zero())
                .unwrap_or(self.fallback_interval);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(polls),
                _ = tokio::time::sleep(wait) => {}
            }
            page_token = next_page_token;
        }
    }
}
