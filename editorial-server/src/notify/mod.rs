//! Notification dispatch.
//!
//! The workflow hands finished [`Notification`]s to a [`Notifier`] and never
//! waits on mail delivery. In production the chain is
//! [`QueuedNotifier`] (bounded, rate limited) in front of [`JsonlOutbox`]
//! (the hand-off file read by the external mailer).

mod outbox;
mod queue;

pub use outbox::JsonlOutbox;
pub use queue::QueuedNotifier;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use editorial_core::Contact;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What a notification is about; selects the mail template downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Submitted,
    RevisionSubmitted,
    AssociateEditorAssigned,
    ReviewerInvited,
    ReviewerReinvited,
    ReviewReminder,
    RevisionReminder,
    ReviewInviteDenied,
    ReviewSubmitted,
    RevisionRequired,
    Withdrawn,
    Rejected,
    ConditionallyAccepted,
    Accepted,
    Published,
}

/// A labelled URL included in the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub label: String,
    pub url: String,
}

/// Editor-written subject and body replacing the template text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMessage {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub to: Contact,
    pub cc: Vec<Contact>,
    pub manuscript_code: String,
    pub title: String,
    pub links: Vec<Link>,
    pub custom: Option<CustomMessage>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        to: Contact,
        manuscript_code: impl Into<String>,
        title: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            to,
            cc: Vec::new(),
            manuscript_code: manuscript_code.into(),
            title: title.into(),
            links: Vec::new(),
            custom: None,
            created_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,

    #[error("failed to write notification: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every notification in memory.
    #[derive(Default)]
    pub struct CapturingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl CapturingNotifier {
        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }

        pub fn kinds(&self) -> Vec<NotificationKind> {
            self.sent().iter().map(|n| n.kind).collect()
        }
    }

    #[async_trait]
    impl Notifier for CapturingNotifier {
        async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification);
            Ok(())
        }
    }

    /// Refuses every notification.
    pub struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notification: Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Closed)
        }
    }
}
