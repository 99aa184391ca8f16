use crate::error::CoreResult;
use crate::events::Event;
use async_trait::async_trait;
use tracing::info;

/// Transport-agnostic notification channel for human-attention events.
///
/// Called on `blocker_created` with sync severity. Platform dispatch
/// (desktop, webhook, email) is the sink's concern; a failing sink is never
/// fatal because the event is already visible on the [`EventBus`](crate::EventBus).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, event: &Event) -> CoreResult<()>;
}

/// Default sink that records notifications in the structured log.
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn send(&self, event: &Event) -> CoreResult<()> {
        info!(event = event.kind(), "notification");
        Ok(())
    }
}
