//! Executes workflow effects.
//!
//! Runs after the state change has been persisted. Failures are logged and
//! never reach the caller: a transition that was stored has succeeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use editorial_core::{Contact, ManuscriptAggregate, ReviewerRef};
use tracing::{debug, error, info, warn};

use super::effect::{Effect, LogLevel};
use super::repository::{DeletedParties, Directory, InviteResponse};
use crate::notify::{CustomMessage, Link, Notification, NotificationKind, Notifier};
use crate::signed_link::LinkSigner;

/// Collaborators the interpreter needs.
#[derive(Clone)]
pub struct InterpreterContext {
    pub directory: Arc<dyn Directory>,
    pub notifier: Arc<dyn Notifier>,
    pub signer: LinkSigner,
}

/// Execute `effects` in order against `agg`, the state they were produced
/// for. Errors are logged and execution continues.
pub async fn execute_effects(
    ctx: &InterpreterContext,
    agg: &ManuscriptAggregate,
    effects: Vec<Effect>,
    now: DateTime<Utc>,
) {
    for effect in effects {
        if let Err(err) = execute_effect(ctx, agg, effect, now).await {
            error!(
                "Effect execution failed for manuscript {}: {}",
                agg.manuscript().code,
                err
            );
        }
    }
}

async fn execute_effect(
    ctx: &InterpreterContext,
    agg: &ManuscriptAggregate,
    effect: Effect,
    now: DateTime<Utc>,
) -> Result<(), String> {
    match effect {
        Effect::NotifyAuthor { kind } => notify_author(ctx, agg, kind, now).await,

        Effect::NotifyParty { party, kind } => {
            let to = contact(ctx, party).await?;
            send(ctx, notification(agg, kind, to, now)).await
        }

        Effect::InviteReviewer {
            party,
            kind,
            custom,
        } => invite(ctx, agg, party, kind, custom, now).await,

        Effect::Log { level, message } => {
            match level {
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Error => error!("{}", message),
            }
            Ok(())
        }
    }
}

async fn contact(ctx: &InterpreterContext, party: ReviewerRef) -> Result<Contact, String> {
    match ctx.directory.party(party, DeletedParties::Exclude).await {
        Ok(Some(found)) => Ok(found.contact),
        Ok(None) => Err(format!("no contact for {}", party)),
        Err(e) => Err(format!("failed to look up {}: {}", party, e)),
    }
}

fn notification(
    agg: &ManuscriptAggregate,
    kind: NotificationKind,
    to: Contact,
    now: DateTime<Utc>,
) -> Notification {
    Notification::new(
        kind,
        to,
        agg.manuscript().code.clone(),
        agg.current().content.title.clone(),
        now,
    )
}

async fn send(ctx: &InterpreterContext, notification: Notification) -> Result<(), String> {
    let kind = notification.kind;
    ctx.notifier
        .notify(notification)
        .await
        .map_err(|e| format!("failed to send {:?} notification: {}", kind, e))
}

async fn notify_author(
    ctx: &InterpreterContext,
    agg: &ManuscriptAggregate,
    kind: NotificationKind,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let to = contact(ctx, ReviewerRef::Registered(agg.manuscript().author_id)).await?;
    let mut notification = notification(agg, kind, to, now);
    for co_author in agg.co_authors() {
        match contact(ctx, co_author).await {
            Ok(cc) => notification.cc.push(cc),
            Err(e) => warn!("Skipping co-author in cc: {}", e),
        }
    }
    send(ctx, notification).await
}

async fn invite(
    ctx: &InterpreterContext,
    agg: &ManuscriptAggregate,
    party: ReviewerRef,
    kind: NotificationKind,
    custom: Option<CustomMessage>,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let to = contact(ctx, party).await?;
    let manuscript = agg.manuscript().id;
    let mut notification = notification(agg, kind, to, now);
    notification.links = vec![
        Link {
            label: "Accept".to_string(),
            url: ctx
                .signer
                .url(manuscript, party, InviteResponse::Accept, now),
        },
        Link {
            label: "Decline".to_string(),
            url: ctx.signer.url(manuscript, party, InviteResponse::Deny, now),
        },
    ];
    notification.custom = custom;
    send(ctx, notification).await
}
