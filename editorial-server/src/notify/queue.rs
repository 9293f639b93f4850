use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::{Notification, Notifier, NotifyError};

/// Notifications waiting for delivery before `notify` starts applying
/// backpressure.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Bounded, rate-limited front for another [`Notifier`].
///
/// Callers return as soon as the notification is queued. A worker task
/// forwards at most `per_minute` notifications per minute; delivery
/// failures are logged and dropped.
#[derive(Clone)]
pub struct QueuedNotifier {
    sender: mpsc::Sender<Notification>,
}

impl QueuedNotifier {
    pub fn new(inner: Arc<dyn Notifier>, per_minute: u32) -> Self {
        Self::with_capacity(inner, per_minute, NOTIFICATION_QUEUE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn Notifier>, per_minute: u32, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pace = Duration::from_secs(60) / per_minute.max(1);

        tokio::spawn(Self::worker(inner, receiver, pace));

        Self { sender }
    }

    async fn worker(
        inner: Arc<dyn Notifier>,
        mut receiver: mpsc::Receiver<Notification>,
        pace: Duration,
    ) {
        let mut ticks = interval(pace);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while let Some(notification) = receiver.recv().await {
            ticks.tick().await;
            let id = notification.id;
            let kind = notification.kind;
            match inner.notify(notification).await {
                Ok(()) => debug!("Delivered notification {} ({:?})", id, kind),
                Err(e) => error!("Failed to deliver notification {} ({:?}): {}", id, kind, e),
            }
        }

        info!("Notification queue shutting down");
    }
}

#[async_trait]
impl Notifier for QueuedNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sender
            .send(notification)
            .await
            .map_err(|_| NotifyError::Closed)
    }
}
