//! Side effects of a workflow step, as data.
//!
//! Transitions return effects; the interpreter resolves contacts, builds
//! notifications and logs. Nothing here can fail a request.

use editorial_core::ReviewerRef;

use crate::notify::{CustomMessage, NotificationKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    // =========================================================================
    // Notifications
    // =========================================================================
    /// One notification to the corresponding author with every co-author in
    /// cc.
    NotifyAuthor { kind: NotificationKind },

    /// Notify a single reviewer, co-author or editor.
    NotifyParty {
        party: ReviewerRef,
        kind: NotificationKind,
    },

    /// Invitation carrying signed accept and deny links.
    InviteReviewer {
        party: ReviewerRef,
        kind: NotificationKind,
        custom: Option<CustomMessage>,
    },

    // =========================================================================
    // Logging
    // =========================================================================
    Log { level: LogLevel, message: String },
}

impl Effect {
    pub fn info(message: impl Into<String>) -> Self {
        Effect::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
