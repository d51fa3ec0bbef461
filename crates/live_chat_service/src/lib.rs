pub mod proto {
    tonic::include_proto!("livechat.collector.v1");
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("live_chat_collector_descriptor");
}

mod convert;

use collector::{LiveUpdate, Orchestrator};
use convert::{split, status};
use proto::live_chat_collector_server::{LiveChatCollector, LiveChatCollectorServer};
use proto::{
    GetArchiveLiveChatRequest, GetArchiveLiveChatResponse, GetCachedActiveLiveChatRequest,
    GetCachedActiveLiveChatResponse, GetVideoRequest, GetVideoResponse,
    StartActiveLiveChatCollectionRequest, StartArchiveLiveChatCollectionRequest,
    StartCollectionResponse, StopCollectionRequest, StopCollectionResponse,
    SubscribeActiveLiveChatRequest, SubscribeActiveLiveChatResponse,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::debug;

pub struct LiveChatCollectorService {
    orchestrator: Arc<Orchestrator>,
}

impl LiveChatCollectorService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

fn require_video_id(video_id: String) -> Result<String, Status> {
    let video_id = video_id.trim().to_string();
    if video_id.is_empty() {
        return Err(Status::invalid_argument("video_id is required"));
    }
    Ok(video_id)
}

#[tonic::async_trait]
impl LiveChatCollector for LiveChatCollectorService {
    type SubscribeActiveLiveChatStream =
        ReceiverStream<Result<SubscribeActiveLiveChatResponse, Status>>;

    async fn get_video(
        &self,
        request: Request<GetVideoRequest>,
    ) -> Result<Response<GetVideoResponse>, Status> {
        let video_id = require_video_id(request.into_inner().video_id)?;
        let (status, video) = split(self.orchestrator.get_video(&video_id).await);
        Ok(Response::new(GetVideoResponse {
            status: Some(status),
            video: video.map(Into::into),
        }))
    }

    async fn start_active_live_chat_collection(
        &self,
        request: Request<StartActiveLiveChatCollectionRequest>,
    ) -> Result<Response<StartCollectionResponse>, Status> {
        let video_id = require_video_id(request.into_inner().video_id)?;
        let (status, video) = split(self.orchestrator.start_active_collection(&video_id).await);
        Ok(Response::new(StartCollectionResponse {
            status: Some(status),
            video: video.map(Into::into),
        }))
    }

    async fn subscribe_active_live_chat(
        &self,
        request: Request<SubscribeActiveLiveChatRequest>,
    ) -> Result<Response<Self::SubscribeActiveLiveChatStream>, Status> {
        let video_id = require_video_id(request.into_inner().video_id)?;
        let mut subscription = self.orchestrator.subscribe_active(&video_id);
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    _ = tx.closed() => break,
                    update = subscription.recv() => update,
                };
                match update {
                    Some(LiveUpdate::Messages(batch)) => {
                        let response = SubscribeActiveLiveChatResponse {
                            status: Some(status(proto::StatusCode::Success, "ok")),
                            messages: batch.iter().map(Into::into).collect(),
                        };
                        if tx.send(Ok(response)).await.is_err() {
                            break;
                        }
                    }
                    Some(LiveUpdate::Failed(reason)) => {
                        let response = SubscribeActiveLiveChatResponse {
                            status: Some(status(proto::StatusCode::InternalError, reason)),
                            messages: Vec::new(),
                        };
                        let _ = tx.send(Ok(response)).await;
                        break;
                    }
                    Some(LiveUpdate::Ended) | None => break,
                }
            }
            debug!(
                video_id = %subscription.video_id(),
                subscription = subscription.id(),
                "subscriber stream closed"
            );
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn get_cached_active_live_chat(
        &self,
        request: Request<GetCachedActiveLiveChatRequest>,
    ) -> Result<Response<GetCachedActiveLiveChatResponse>, Status> {
        let request = request.into_inner();
        let video_id = require_video_id(request.video_id)?;
        let outcome = self
            .orchestrator
            .get_cached_active(&video_id, &request.page_token)
            .await;
        let (status, page) = split(outcome);
        let (messages, next_page_token): (Vec<proto::ActiveLiveChatMessage>, String) = page
            .map(|page| {
                (
                    page.messages.iter().map(Into::into).collect(),
                    page.next_page_token,
                )
            })
            .unwrap_or_default();
        Ok(Response::new(GetCachedActiveLiveChatResponse {
            status: Some(status),
            messages,
            next_page_token,
        }))
    }

    async fn start_archive_live_chat_collection(
        &self,
        request: Request<StartArchiveLiveChatCollectionRequest>,
    ) -> Result<Response<StartCollectionResponse>, Status> {
        let request = request.into_inner();
        let video_id = require_video_id(request.video_id)?;
        let outcome = self
            .orchestrator
            .start_archive_collection(&video_id, request.replace)
            .await;
        let (status, video) = split(outcome);
        Ok(Response::new(StartCollectionResponse {
            status: Some(status),
            video: video.map(Into::into),
        }))
    }

    async fn get_archive_live_chat(
        &self,
        request: Request<GetArchiveLiveChatRequest>,
    ) -> Result<Response<GetArchiveLiveChatResponse>, Status> {
        let request = request.into_inner();
        let video_id = require_video_id(request.video_id)?;
        let outcome = self
            .orchestrator
            .get_archive_live_chat(&video_id, request.offset, request.count)
            .await;
        let (status, messages) = split(outcome);
        Ok(Response::new(GetArchiveLiveChatResponse {
            status: Some(status),
            messages: messages
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
        }))
    }

    async fn stop_collection(
        &self,
        request: Request<StopCollectionRequest>,
    ) -> Result<Response<StopCollectionResponse>, Status> {
        let request = request.into_inner();
        let kind = proto::CollectionKind::try_from(request.kind)
            .map_err(|_| Status::invalid_argument("unknown collection kind"))?;
        let video_id = require_video_id(request.video_id)?;

        let stopped = self.orchestrator.stop_collection(&video_id, kind.into());
        let response_status = if stopped {
            status(proto::StatusCode::Success, "stop requested")
        } else {
            status(proto::StatusCode::NotFound, "no collection running")
        };
        Ok(Response::new(StopCollectionResponse {
            status: Some(response_status),
            stopped,
        }))
    }
}

pub fn create_service(
    orchestrator: Arc<Orchestrator>,
) -> LiveChatCollectorServer<LiveChatCollectorService> {
    LiveChatCollectorServer::new(LiveChatCollectorService::new(orchestrator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use collector::CollectorConfig;
    use datastore::{InMemoryRepository, Repository};
    use domain::{ActiveLiveChatMessage, Video};
    use youtube_client::{LiveChatPage, LiveChatSource, ReplayChunk, ReplaySession, ReplaySource};

    /// Upstream that knows no videos
    struct EmptyUpstream;

    #[async_trait]
    impl LiveChatSource for EmptyUpstream {
        async fn fetch_video(&self, _video_id: &str) -> youtube_client::Result<Option<Video>> {
            Ok(None)
        }

        async fn fetch_messages(
            &self,
            _video: &Video,
            _page_token: &str,
        ) -> youtube_client::Result<LiveChatPage> {
            Ok(LiveChatPage::default())
        }
    }

    #[async_trait]
    impl ReplaySource for EmptyUpstream {
        async fn seed(&self, _video_id: &str) -> youtube_client::Result<Option<ReplaySession>> {
            Ok(None)
        }

        async fn fetch_chunk(
            &self,
            _session: &ReplaySession,
            _continuation: &str,
            _player_offset_ms: i64,
        ) -> youtube_client::Result<ReplayChunk> {
            Ok(ReplayChunk::default())
        }
    }

    fn service() -> (LiveChatCollectorService, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        let upstream = Arc::new(EmptyUpstream);
        let orchestrator = Orchestrator::new(
            repo.clone(),
            upstream.clone(),
            upstream,
            CollectorConfig::default(),
        );
        (LiveChatCollectorService::new(Arc::new(orchestrator)), repo)
    }

    fn message(id: &str) -> ActiveLiveChatMessage {
        let now = Utc::now();
        ActiveLiveChatMessage {
            id: id.to_string(),
            channel_id: "channel".to_string(),
            video_id: "v1".to_string(),
            author_channel_id: "author".to_string(),
            author_display_name: "Author".to_string(),
            author_profile_image_url: String::new(),
            is_chat_moderator: false,
            is_chat_owner: false,
            is_chat_sponsor: false,
            is_verified: false,
            display_message: "hello".to_string(),
            super_chat: None,
            published_at: now,
            page_token: String::new(),
            last_update: now,
        }
    }

    fn code(status: &Option<proto::ResponseStatus>) -> proto::StatusCode {
        status
            .as_ref()
            .map(|s| s.code())
            .unwrap_or(proto::StatusCode::Success)
    }

    #[tokio::test]
    async fn test_missing_video_id_is_invalid_argument() {
        let (service, _) = service();
        let err = service
            .get_video(Request::new(GetVideoRequest {
                video_id: "  ".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_unknown_video_is_not_found() {
        let (service, _) = service();
        let response = service
            .start_active_live_chat_collection(Request::new(StartActiveLiveChatCollectionRequest {
                video_id: "v1".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(code(&response.status), proto::StatusCode::NotFound);
        assert!(response.video.is_none());
    }

    #[tokio::test]
    async fn test_cached_messages_are_served() {
        let (service, repo) = service();
        repo.upsert_active_messages(&[message("a"), message("b")])
            .await
            .unwrap();

        let response = service
            .get_cached_active_live_chat(Request::new(GetCachedActiveLiveChatRequest {
                video_id: "v1".into(),
                page_token: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(code(&response.status), proto::StatusCode::Success);
        assert_eq!(response.messages.len(), 2);
        assert!(response.next_page_token.is_empty());
    }

    #[tokio::test]
    async fn test_archive_without_rows_is_not_found() {
        let (service, _) = service();
        let response = service
            .get_archive_live_chat(Request::new(GetArchiveLiveChatRequest {
                video_id: "v9".into(),
                offset: 0,
                count: 0,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(code(&response.status), proto::StatusCode::NotFound);
        assert!(response.messages.is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_collection() {
        let (service, _) = service();
        let response = service
            .stop_collection(Request::new(StopCollectionRequest {
                video_id: "v1".into(),
                kind: proto::CollectionKind::Archive as i32,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.stopped);
        assert_eq!(code(&response.status), proto::StatusCode::NotFound);

        let err = service
            .stop_collection(Request::new(StopCollectionRequest {
                video_id: "v1".into(),
                kind: 42,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_subscribe_stream_closes_when_client_drops() {
        let (service, _) = service();
        let stream = service
            .subscribe_active_live_chat(Request::new(SubscribeActiveLiveChatRequest {
                video_id: "v1".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        for _ in 0..100 {
            if service.orchestrator.subscriber_count("v1").await == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(service.orchestrator.subscriber_count("v1").await, 1);

        drop(stream);
        for _ in 0..100 {
            if service.orchestrator.subscriber_count("v1").await == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("subscription outlived its stream");
    }
}
