//! Replay scraping for a finished broadcast.

use crate::registry::Ticket;
use crate::{CollectorError, Result};
use chrono::Utc;
use datastore::Repository;
use domain::{ArchiveLiveChatMessage, ArchiveMessageKind, Video};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use youtube_client::{ChatItem, ReplayAction, ReplaySource};

/// Totals of one scrape run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeReport {
    pub messages: u64,
    pub pages: u64,
    /// Retries spent across seeding and every page
    pub retries: u32,
    pub cancelled: bool,
}

/// Walks a replay from the first continuation to the last, persisting each
/// page as it arrives.
pub struct ArchiveScraper {
    source: Arc<dyn ReplaySource>,
    repo: Arc<dyn Repository>,
    max_retries: u32,
    retry_delay: Duration,
}

impl ArchiveScraper {
    pub fn new(
        source: Arc<dyn ReplaySource>,
        repo: Arc<dyn Repository>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            source,
            repo,
            max_retries,
            retry_delay,
        }
    }

    /// Run to completion and release the ticket. Cancellation is not an
    /// error; the report says how far the run got.
    pub async fn run(self, ticket: Ticket, video: Video) -> Result<ScrapeReport> {
        let mut report = ScrapeReport::default();
        match self.scrape(ticket.cancellation_token(), &video, &mut report).await {
            Ok(()) => {
                info!(
                    video_id = %video.id,
                    messages = report.messages,
                    pages = report.pages,
                    retries = report.retries,
                    "archive collection finished"
                );
                Ok(report)
            }
            Err(CollectorError::Cancelled) => {
                info!(
                    video_id = %video.id,
                    messages = report.messages,
                    "archive collection cancelled"
                );
                report.cancelled = true;
                Ok(report)
            }
            Err(err) => {
                error!(
                    video_id = %video.id,
                    messages = report.messages,
                    error = %err,
                    "archive collection failed"
                );
                Err(err)
            }
        }
    }

    async fn scrape(
        &self,
        cancel: &CancellationToken,
        video: &Video,
        report: &mut ScrapeReport,
    ) -> Result<()> {
        let source = &self.source;
        let video_id = video.id.as_str();
        let session = self
            .with_retry(cancel, report, move || source.seed(video_id))
            .await?;
        let Some(session) = session else {
            info!(video_id = %video.id, "no chat replay available");
            return Ok(());
        };

        let mut continuation = session.continuation.clone();
        let mut player_offset_ms = 0i64;
        while !continuation.is_empty() {
            let (current, token) = (&session, continuation.as_str());
            let chunk = self
                .with_retry(cancel, report, move || {
                    source.fetch_chunk(current, token, player_offset_ms)
                })
                .await?;

            let now = Utc::now();
            let messages: Vec<ArchiveLiveChatMessage> = chunk
                .actions
                .into_iter()
                .map(|action| to_archive_message(video, action, now))
                .collect();
            self.repo.upsert_archive_messages(&messages).await?;
            report.messages += messages.len() as u64;
            report.pages += 1;
            debug!(video_id = %video.id, count = messages.len(), "persisted replay page");

            if let Some(offset) = chunk.last_video_offset_ms {
                player_offset_ms = offset;
            }
            if chunk.continuation == continuation {
                warn!(video_id = %video.id, "replay returned the same continuation, stopping");
                break;
            }
            continuation = chunk.continuation;
        }
        Ok(())
    }

    /// Attempt `op` up to `max_retries + 1` times with a fixed delay.
    /// Only transient feed errors are retried.
    async fn with_retry<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        report: &mut ScrapeReport,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = youtube_client::Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
                result = op() => result,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err.into()),
                Err(err) if attempt >= self.max_retries => {
                    return Err(CollectorError::RetriesExhausted {
                        attempts: attempt + 1,
                        source: err,
                    });
                }
                Err(err) => {
                    attempt += 1;
                    report.retries += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "replay request failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}

fn to_archive_message(
    video: &Video,
    action: ReplayAction,
    now: chrono::DateTime<Utc>,
) -> ArchiveLiveChatMessage {
    let (kind, message, purchase_amount_text) = match action.item {
        ChatItem::Paid {
            message,
            purchase_amount_text,
        } => (ArchiveMessageKind::Paid, message, purchase_amount_text),
        ChatItem::Text(message) => (ArchiveMessageKind::Text, message, String::new()),
    };
    ArchiveLiveChatMessage {
        unique_id: ArchiveLiveChatMessage::build_unique_id(
            &video.id,
            kind,
            &message.id,
            message.timestamp_usec,
            &action.client_id,
        ),
        kind,
        message_id: message.id,
        channel_id: video.channel_id.clone(),
        video_id: video.id.clone(),
        client_id: action.client_id,
        author_external_channel_id: message.author_external_channel_id,
        author_name: message.author_name,
        author_photo_url: message.author_photo_url,
        message_text: message.text,
        purchase_amount_text,
        video_offset_time_msec: action.video_offset_time_msec,
        timestamp_usec: message.timestamp_usec,
        last_update: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CollectionRegistry;
    use crate::test_support::{FakeReplay, archived_video, chunk, paid_action, text_action};
    use datastore::InMemoryRepository;
    use domain::CollectionKind;
    use youtube_client::FeedError;

    fn scraper(
        source: Arc<FakeReplay>,
        repo: Arc<InMemoryRepository>,
        max_retries: u32,
    ) -> ArchiveScraper {
        ArchiveScraper::new(source, repo, max_retries, Duration::from_millis(5_000))
    }

    fn ticket(registry: &CollectionRegistry) -> Ticket {
        registry.try_register("v2", CollectionKind::Archive).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_until_continuation_is_empty() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(
            Some("c1"),
            vec![
                Ok(chunk(
                    vec![text_action("a", 1_000), paid_action("b", 2_000)],
                    "c2",
                    Some(2_500),
                )),
                Ok(chunk(vec![text_action("c", 3_000)], "", Some(3_000))),
            ],
        );

        let report = scraper(source.clone(), repo.clone(), 3)
            .run(ticket(&registry), archived_video("v2"))
            .await
            .unwrap();

        assert_eq!(report.messages, 3);
        assert_eq!(report.pages, 2);
        assert_eq!(report.retries, 0);
        assert!(!report.cancelled);
        assert_eq!(
            source.chunk_requests(),
            vec![("c1".to_string(), 0), ("c2".to_string(), 2_500)]
        );

        let stored = repo.get_archive_messages("v2", 0, 10).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].kind, ArchiveMessageKind::Paid);
        assert_eq!(stored[1].purchase_amount_text, "$5.00");
        assert_eq!(stored[1].unique_id, "v2.paid.b.2000000.client-b");
        assert_eq!(stored[0].channel_id, "channel");
        assert!(!registry.is_registered("v2", CollectionKind::Archive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_page_with_empty_continuation_needs_no_retry() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(
            Some("c1"),
            vec![Ok(chunk(vec![text_action("only", 500)], "", None))],
        );

        let report = scraper(source.clone(), repo.clone(), 3)
            .run(ticket(&registry), archived_video("v2"))
            .await
            .unwrap();

        assert_eq!(report.retries, 0);
        assert_eq!(report.pages, 1);
        assert_eq!(source.chunk_requests().len(), 1);
        assert_eq!(repo.count_archive_messages("v2").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_replay_is_done_without_messages() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(None, Vec::new());

        let report = scraper(source.clone(), repo, 3)
            .run(ticket(&registry), archived_video("v2"))
            .await
            .unwrap();

        assert_eq!(report, ScrapeReport::default());
        assert!(source.chunk_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_then_recovers() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(
            Some("c1"),
            vec![
                Err(FeedError::Network("reset".into())),
                Err(FeedError::Status { status: 503, url: "u".into() }),
                Ok(chunk(vec![text_action("a", 100)], "", None)),
            ],
        );

        let started = tokio::time::Instant::now();
        let report = scraper(source.clone(), repo, 3)
            .run(ticket(&registry), archived_video("v2"))
            .await
            .unwrap();

        assert_eq!(report.retries, 2);
        assert_eq!(report.messages, 1);
        assert!(started.elapsed() >= Duration::from_millis(10_000));
        // The same page is requested again on retry
        assert!(source.chunk_requests().iter().all(|(c, _)| c == "c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let failures = (0..10)
            .map(|_| Err(FeedError::Network("down".into())))
            .collect();
        let source = FakeReplay::new(Some("c1"), failures);

        let result = scraper(source.clone(), repo, 3)
            .run(ticket(&registry), archived_video("v2"))
            .await;

        assert!(matches!(
            result,
            Err(CollectorError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(source.chunk_requests().len(), 4);
        assert!(!registry.is_registered("v2", CollectionKind::Archive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_failure_is_not_retried() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(
            Some("c1"),
            vec![Err(FeedError::Decode("not json".into()))],
        );

        let result = scraper(source.clone(), repo, 3)
            .run(ticket(&registry), archived_video("v2"))
            .await;

        assert!(matches!(result, Err(CollectorError::Feed(FeedError::Decode(_)))));
        assert_eq!(source.chunk_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_failure_is_retried() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(
            Some("c1"),
            vec![Ok(chunk(vec![text_action("a", 100)], "", None))],
        );
        source.fail_seed_with(vec![
            FeedError::Network("reset".into()),
            FeedError::Status { status: 429, url: "u".into() },
        ]);

        let started = tokio::time::Instant::now();
        let report = scraper(source.clone(), repo, 3)
            .run(ticket(&registry), archived_video("v2"))
            .await
            .unwrap();

        assert_eq!(source.seed_calls(), 3);
        assert_eq!(report.retries, 2);
        assert_eq!(report.messages, 1);
        assert!(started.elapsed() >= Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_seed_gives_up_after_max_retries() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let source = FakeReplay::new(Some("c1"), Vec::new());
        source.fail_seed_with(
            (0..10)
                .map(|_| FeedError::Network("down".into()))
                .collect(),
        );

        let result = scraper(source.clone(), repo, 3)
            .run(ticket(&registry), archived_video("v2"))
            .await;

        assert!(matches!(
            result,
            Err(CollectorError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(source.seed_calls(), 4);
        assert!(source.chunk_requests().is_empty());
        assert!(!registry.is_registered("v2", CollectionKind::Archive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retry_delay() {
        let registry = CollectionRegistry::new();
        let repo = Arc::new(InMemoryRepository::new());
        let failures = (0..10)
            .map(|_| Err(FeedError::Network("down".into())))
            .collect();
        let source = FakeReplay::new(Some("c1"), failures);

        let task = tokio::spawn(
            scraper(source.clone(), repo, 3).run(ticket(&registry), archived_video("v2")),
        );
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        registry.cancel("v2", CollectionKind::Archive);

        let report = task.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(source.chunk_requests().len(), 1);
    }
}
