//! Fan-out of freshly polled live messages to per-video subscribers.
//!
//! One actor task owns the subscription table and handles every command in
//! arrival order. Each subscriber reads from its own bounded queue. When a
//! queue is full the new batch is dropped for that subscriber only, so a
//! slow reader never stalls the poller or its peers. Every queue keeps one
//! slot past its batch capacity for the terminal update.

use domain::ActiveLiveChatMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    Messages(Arc<[ActiveLiveChatMessage]>),
    /// The poller stopped on an error; nothing follows
    Failed(String),
    /// The collection was stopped; nothing follows
    Ended,
}

impl LiveUpdate {
    fn is_terminal(&self) -> bool {
        !matches!(self, LiveUpdate::Messages(_))
    }
}

enum HubCommand {
    Subscribe {
        video_id: String,
        id: u64,
        sink: mpsc::Sender<LiveUpdate>,
    },
    Unsubscribe {
        video_id: String,
        id: u64,
    },
    Publish {
        video_id: String,
        update: LiveUpdate,
    },
    Inspect {
        video_id: String,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable front of the hub actor. The actor stops once every handle and
/// subscription is gone.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

impl HubHandle {
    /// Start the actor. `buffer` bounds each subscriber's queue.
    pub fn spawn(buffer: usize) -> (Self, JoinHandle<()>) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(inbox));
        let handle = Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        };
        (handle, task)
    }

    /// Register a new subscriber for `video_id`. It sees only batches
    /// published after this call.
    pub fn subscribe(&self, video_id: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, updates) = mpsc::channel(self.buffer.saturating_add(1));
        self.send(HubCommand::Subscribe {
            video_id: video_id.to_string(),
            id,
            sink,
        });
        Subscription {
            id,
            video_id: video_id.to_string(),
            updates,
            hub: self.clone(),
        }
    }

    pub fn publish_messages(&self, video_id: &str, messages: Vec<ActiveLiveChatMessage>) {
        if messages.is_empty() {
            return;
        }
        self.publish(video_id, LiveUpdate::Messages(messages.into()));
    }

    pub fn publish_failure(&self, video_id: &str, reason: impl Into<String>) {
        self.publish(video_id, LiveUpdate::Failed(reason.into()));
    }

    pub fn publish_end(&self, video_id: &str) {
        self.publish(video_id, LiveUpdate::Ended);
    }

    /// Number of live subscriptions for `video_id`, as seen by the actor
    /// after every earlier command.
    pub async fn subscriber_count(&self, video_id: &str) -> usize {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::Inspect {
            video_id: video_id.to_string(),
            reply,
        });
        answer.await.unwrap_or(0)
    }

    fn publish(&self, video_id: &str, update: LiveUpdate) {
        self.send(HubCommand::Publish {
            video_id: video_id.to_string(),
            update,
        });
    }

    fn send(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            debug!("broadcast hub is gone, command ignored");
        }
    }
}

/// A subscriber's end of the hub. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    video_id: String,
    updates: mpsc::Receiver<LiveUpdate>,
    hub: HubHandle,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Next update, or `None` after a terminal update has been read or the
    /// hub shut down.
    pub async fn recv(&mut self) -> Option<LiveUpdate> {
        self.updates.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.send(HubCommand::Unsubscribe {
            video_id: std::mem::take(&mut self.video_id),
            id: self.id,
        });
    }
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<String, HashMap<u64, mpsc::Sender<LiveUpdate>>>,
}

async fn run(mut inbox: mpsc::UnboundedReceiver<HubCommand>) {
    let mut state = HubState::default();
    while let Some(command) = inbox.recv().await {
        state.handle(command);
    }
    debug!("broadcast hub stopped");
}

impl HubState {
    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Subscribe { video_id, id, sink } => {
                debug!(%video_id, subscription = id, "subscribed");
                self.subscribers.entry(video_id).or_default().insert(id, sink);
            }
            HubCommand::Unsubscribe { video_id, id } => {
                if let Some(sinks) = self.subscribers.get_mut(&video_id) {
                    sinks.remove(&id);
                    if sinks.is_empty() {
                        self.subscribers.remove(&video_id);
                    }
                }
            }
            HubCommand::Publish { video_id, update } => self.publish(video_id, update),
            HubCommand::Inspect { video_id, reply } => {
                let count = self.subscribers.get(&video_id).map_or(0, HashMap::len);
                let _ = reply.send(count);
            }
        }
    }

    fn publish(&mut self, video_id: String, update: LiveUpdate) {
        if update.is_terminal() {
            // Dropping the senders closes every stream once the terminal update is read
            if let Some(sinks) = self.subscribers.remove(&video_id) {
                for (id, sink) in sinks {
                    if let Err(TrySendError::Full(_)) = sink.try_send(update.clone()) {
                        warn!(%video_id, subscription = id, "terminal update lost");
                    }
                }
            }
            return;
        }

        let Some(sinks) = self.subscribers.get_mut(&video_id) else {
            return;
        };
        sinks.retain(|id, sink| {
            if sink.is_closed() {
                return false;
            }
            // The last free slot is held back for the terminal update
            if sink.capacity() <= 1 {
                warn!(%video_id, subscription = id, "subscriber is lagging, batch dropped");
                return true;
            }
            !matches!(sink.try_send(update.clone()), Err(TrySendError::Closed(_)))
        });
        if sinks.is_empty() {
            self.subscribers.remove(&video_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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
            display_message: id.to_string(),
            super_chat: None,
            published_at: now,
            page_token: String::new(),
            last_update: now,
        }
    }

    fn ids(update: LiveUpdate) -> Vec<String> {
        match update {
            LiveUpdate::Messages(batch) => batch.iter().map(|m| m.id.clone()).collect(),
            other => panic!("expected messages, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let (hub, _task) = HubHandle::spawn(8);
        let mut a = hub.subscribe("v1");
        let mut b = hub.subscribe("v1");
        let mut other = hub.subscribe("v2");

        hub.publish_messages("v1", vec![message("m1")]);
        hub.publish_messages("v1", vec![message("m2"), message("m3")]);
        assert_eq!(hub.subscriber_count("v1").await, 2);

        assert_eq!(ids(a.recv().await.unwrap()), vec!["m1"]);
        assert_eq!(ids(a.recv().await.unwrap()), vec!["m2", "m3"]);
        assert_eq!(ids(b.recv().await.unwrap()), vec!["m1"]);
        assert_eq!(ids(b.recv().await.unwrap()), vec!["m2", "m3"]);
        assert!(other.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_no_history() {
        let (hub, _task) = HubHandle::spawn(8);
        hub.publish_messages("v1", vec![message("before")]);
        let mut late = hub.subscribe("v1");
        hub.publish_messages("v1", vec![message("after")]);

        assert_eq!(ids(late.recv().await.unwrap()), vec!["after"]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_published() {
        let (hub, _task) = HubHandle::spawn(8);
        let mut sub = hub.subscribe("v1");
        hub.publish_messages("v1", Vec::new());
        hub.publish_messages("v1", vec![message("m1")]);

        assert_eq!(ids(sub.recv().await.unwrap()), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_slow_subscriber_only() {
        let (hub, _task) = HubHandle::spawn(1);
        let mut slow = hub.subscribe("v1");
        let mut fast = hub.subscribe("v1");

        hub.publish_messages("v1", vec![message("m1")]);
        assert_eq!(ids(fast.recv().await.unwrap()), vec!["m1"]);
        hub.publish_messages("v1", vec![message("m2")]);
        assert_eq!(ids(fast.recv().await.unwrap()), vec!["m2"]);

        // slow never read, so m2 was dropped for it but it stays subscribed
        assert_eq!(hub.subscriber_count("v1").await, 2);
        assert_eq!(ids(slow.recv().await.unwrap()), vec!["m1"]);
        hub.publish_messages("v1", vec![message("m3")]);
        assert_eq!(ids(slow.recv().await.unwrap()), vec!["m3"]);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (hub, _task) = HubHandle::spawn(8);
        let sub = hub.subscribe("v1");
        let _keep = hub.subscribe("v1");
        assert_eq!(hub.subscriber_count("v1").await, 2);

        drop(sub);
        assert_eq!(hub.subscriber_count("v1").await, 1);
    }

    #[tokio::test]
    async fn test_failure_ends_every_stream() {
        let (hub, _task) = HubHandle::spawn(8);
        let mut a = hub.subscribe("v1");
        let mut b = hub.subscribe("v1");

        hub.publish_messages("v1", vec![message("m1")]);
        hub.publish_failure("v1", "upstream went away");

        assert_eq!(ids(a.recv().await.unwrap()), vec!["m1"]);
        assert_eq!(
            a.recv().await,
            Some(LiveUpdate::Failed("upstream went away".into()))
        );
        assert_eq!(a.recv().await, None);

        b.recv().await;
        assert!(matches!(b.recv().await, Some(LiveUpdate::Failed(_))));
        assert_eq!(b.recv().await, None);
        assert_eq!(hub.subscriber_count("v1").await, 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_subscriber_with_full_queue() {
        let (hub, _task) = HubHandle::spawn(1);
        let mut sub = hub.subscribe("v1");

        hub.publish_messages("v1", vec![message("m1")]);
        hub.publish_messages("v1", vec![message("m2")]);
        hub.publish_failure("v1", "upstream went away");

        assert_eq!(ids(sub.recv().await.unwrap()), vec!["m1"]);
        assert_eq!(
            sub.recv().await,
            Some(LiveUpdate::Failed("upstream went away".into()))
        );
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_end_closes_streams() {
        let (hub, _task) = HubHandle::spawn(8);
        let mut sub = hub.subscribe("v1");

        hub.publish_end("v1");
        assert_eq!(sub.recv().await, Some(LiveUpdate::Ended));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_teardown_leaves_new_subscriber_alone() {
        let (hub, _task) = HubHandle::spawn(8);
        let mut torn_down = hub.subscribe("v1");
        hub.publish_failure("v1", "gone");
        assert!(matches!(torn_down.recv().await, Some(LiveUpdate::Failed(_))));
        assert_eq!(torn_down.recv().await, None);

        let mut fresh = hub.subscribe("v1");
        drop(torn_down);
        assert_eq!(hub.subscriber_count("v1").await, 1);

        hub.publish_messages("v1", vec![message("m1")]);
        assert_eq!(ids(fresh.recv().await.unwrap()), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_actor_stops_when_handles_are_gone() {
        let (hub, task) = HubHandle::spawn(8);
        let sub = hub.subscribe("v1");
        drop(hub);
        drop(sub);
        task.await.unwrap();
    }
}
