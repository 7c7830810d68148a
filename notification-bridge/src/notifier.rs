//! Best-effort notification fan-out

use crate::{
    metrics::record_notification,
    push::{DisabledPush, PushSender},
    realtime::{InMemoryRealtime, RealtimeChannel},
    types::{EventName, PushDelivery, PushMessage, RealtimeEvent, Room},
};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a push notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushReport {
    /// Accepted by the push provider
    Sent,
    /// Nothing sent (no token, or push not configured)
    Skipped,
    /// Token is unregistered and should be purged by the caller
    InvalidToken,
    /// Transport or provider failure, already logged
    Failed,
}

/// Sends push notifications and real-time events without ever failing
#[derive(Clone)]
pub struct Notifier {
    push: Arc<dyn PushSender>,
    realtime: Arc<dyn RealtimeChannel>,
}

impl Notifier {
    /// Create a notifier from a push sender and a real-time channel
    pub fn new(push: Arc<dyn PushSender>, realtime: Arc<dyn RealtimeChannel>) -> Self {
        Self { push, realtime }
    }

    /// Push disabled, events kept in memory
    pub fn in_memory() -> (Self, Arc<InMemoryRealtime>) {
        let realtime = Arc::new(InMemoryRealtime::default());
        let notifier = Self::new(Arc::new(DisabledPush), realtime.clone());
        (notifier, realtime)
    }

    /// Send a push notification to an optional device token
    pub async fn push(&self, token: Option<&str>, message: PushMessage) -> PushReport {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => {
                debug!(title = %message.title, "No push token, skipping");
                record_notification("push", "skipped");
                return PushReport::Skipped;
            }
        };

        let message = PushMessage {
            token: token.to_string(),
            ..message
        };

        let report = match self.push.send(&message).await {
            Ok(Some(PushDelivery::Delivered { message_id })) => {
                debug!(message_id = %message_id, title = %message.title, "Push delivered");
                PushReport::Sent
            }
            Ok(Some(PushDelivery::InvalidToken)) => {
                warn!(title = %message.title, "Push token is no longer registered");
                PushReport::InvalidToken
            }
            Ok(None) => PushReport::Skipped,
            Err(e) => {
                warn!(error = %e, title = %message.title, "Push notification failed");
                PushReport::Failed
            }
        };

        record_notification("push", report.as_str());
        report
    }

    /// Emit a real-time event; returns whether the channel accepted it
    pub async fn emit(&self, room: Room, name: EventName, payload: serde_json::Value) -> bool {
        let event = RealtimeEvent::new(name, payload);
        match self.realtime.emit(&room, &event).await {
            Ok(()) => {
                record_notification("realtime", "sent");
                true
            }
            Err(e) => {
                warn!(room = %room, event = %name, error = %e, "Real-time emit failed");
                record_notification("realtime", "failed");
                false
            }
        }
    }
}

impl PushReport {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            PushReport::Sent => "sent",
            PushReport::Skipped => "skipped",
            PushReport::InvalidToken => "invalid_token",
            PushReport::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingPush {
        reply: fn() -> Result<Option<PushDelivery>>,
        sent: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushSender for RecordingPush {
        async fn send(&self, message: &PushMessage) -> Result<Option<PushDelivery>> {
            self.sent.lock().unwrap().push(message.clone());
            (self.reply)()
        }
    }

    struct BrokenChannel;

    #[async_trait]
    impl RealtimeChannel for BrokenChannel {
        async fn emit(&self, _room: &Room, _event: &RealtimeEvent) -> Result<()> {
            Err(Error::Publish("socket closed".into()))
        }
    }

    fn notifier_with(
        reply: fn() -> Result<Option<PushDelivery>>,
    ) -> (Notifier, Arc<RecordingPush>) {
        let push = Arc::new(RecordingPush {
            reply,
            sent: Mutex::new(Vec::new()),
        });
        let notifier = Notifier::new(push.clone(), Arc::new(InMemoryRealtime::default()));
        (notifier, push)
    }

    #[tokio::test]
    async fn test_push_sent_with_token() {
        let (notifier, push) = notifier_with(|| {
            Ok(Some(PushDelivery::Delivered {
                message_id: "m1".into(),
            }))
        });
        let report = notifier
            .push(Some("tok"), PushMessage::new("", "Alocação Iniciada!", "body"))
            .await;

        assert_eq!(report, PushReport::Sent);
        let sent = push.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].token, "tok");
    }

    #[tokio::test]
    async fn test_push_without_token_is_skipped() {
        let (notifier, push) = notifier_with(|| Ok(None));
        assert_eq!(
            notifier.push(None, PushMessage::new("", "t", "b")).await,
            PushReport::Skipped
        );
        assert_eq!(
            notifier.push(Some(""), PushMessage::new("", "t", "b")).await,
            PushReport::Skipped
        );
        assert!(push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_errors_are_swallowed() {
        let (notifier, _) = notifier_with(|| Err(Error::Push("503".into())));
        let report = notifier.push(Some("tok"), PushMessage::new("", "t", "b")).await;
        assert_eq!(report, PushReport::Failed);
    }

    #[tokio::test]
    async fn test_invalid_token_reported() {
        let (notifier, _) = notifier_with(|| Ok(Some(PushDelivery::InvalidToken)));
        let report = notifier.push(Some("old"), PushMessage::new("", "t", "b")).await;
        assert_eq!(report, PushReport::InvalidToken);
    }

    #[tokio::test]
    async fn test_disabled_push_in_memory_notifier() {
        let (notifier, realtime) = Notifier::in_memory();
        let report = notifier.push(Some("tok"), PushMessage::new("", "t", "b")).await;
        assert_eq!(report, PushReport::Skipped);

        let room = Room::Company("c1".into());
        assert!(
            notifier
                .emit(room.clone(), EventName::AllocationExpired, json!({ "allocationId": "a1" }))
                .await
        );
        assert_eq!(realtime.events_for(&room).await.len(), 1);
    }

    #[tokio::test]
    async fn test_emit_failure_returns_false() {
        let notifier = Notifier::new(Arc::new(DisabledPush), Arc::new(BrokenChannel));
        let ok = notifier
            .emit(
                Room::Driver("d1".into()),
                EventName::AllocationStarted,
                json!({ "allocationId": "a1" }),
            )
            .await;
        assert!(!ok);
    }
}
