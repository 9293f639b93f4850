//! Reviewer invitation lifecycle.
//!
//! A reviewer assignment moves `created → invited → {accepted | denied}`.
//! Accepted and denied are final and mutually exclusive: whichever response
//! lands first wins and the other becomes a no-op. Re-inviting re-stamps
//! `invited_at` and bumps the counter; reminders only count.
//!
//! The periodic sweeps decide due-ness here so the in-memory and SQLite
//! backends share one definition of "due".

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::AuthorId;

/// Where a reviewer assignment is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvitationState {
    Created,
    Invited,
    Accepted,
    Denied,
}

/// Invitation bookkeeping carried by every reviewer assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Editor who sent the latest invitation; `None` when the sweep did.
    pub invited_by: Option<AuthorId>,
    pub invited_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub denied_at: Option<DateTime<Utc>>,
    pub invite_count: u32,
    pub remind_count: u32,
}

impl Invitation {
    pub fn state(&self) -> InvitationState {
        if self.accepted_at.is_some() {
            InvitationState::Accepted
        } else if self.denied_at.is_some() {
            InvitationState::Denied
        } else if self.invited_at.is_some() {
            InvitationState::Invited
        } else {
            InvitationState::Created
        }
    }

    /// Invited and not yet answered either way.
    pub fn is_open(&self) -> bool {
        self.state() == InvitationState::Invited
    }

    pub fn is_resolved(&self) -> bool {
        self.accepted_at.is_some() || self.denied_at.is_some()
    }

    /// Send (or resend) the invitation.
    pub fn invite(&mut self, now: DateTime<Utc>, by: Option<AuthorId>) {
        self.invited_at = Some(now);
        if by.is_some() {
            self.invited_by = by;
        }
        self.invite_count = self.invite_count.saturating_add(1);
    }

    pub fn remind(&mut self) {
        self.remind_count = self.remind_count.saturating_add(1);
    }

    /// Record acceptance. Returns `false` (and changes nothing) if the
    /// invitation was already answered.
    pub fn accept(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.accepted_at = Some(now);
        true
    }

    /// Record refusal. Returns `false` (and changes nothing) if the
    /// invitation was already answered.
    pub fn deny(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_resolved() {
            return false;
        }
        self.denied_at = Some(now);
        true
    }

    /// Whether the reinvite sweep should resend this invitation now.
    pub fn reinvite_due(&self, policy: &SweepPolicy, now: DateTime<Utc>) -> bool {
        match self.invited_at {
            Some(invited_at) if !self.is_resolved() => {
                policy.is_due(invited_at, self.invite_count, self.invite_count.max(1), now)
            }
            _ => false,
        }
    }

    /// Whether the remind sweep should nudge an accepted reviewer now.
    ///
    /// The anchor (`accepted_at`) never moves, so the k-th reminder falls
    /// k cooldowns after acceptance.
    pub fn remind_due(&self, policy: &SweepPolicy, now: DateTime<Utc>, has_review: bool) -> bool {
        if has_review || self.denied_at.is_some() {
            return false;
        }
        match self.accepted_at {
            Some(accepted_at) => policy.is_due(
                accepted_at,
                self.remind_count,
                self.remind_count.saturating_add(1),
                now,
            ),
            None => false,
        }
    }
}

/// Cap and cooldown for one periodic sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPolicy {
    /// Rows whose counter reached this are never selected again.
    pub cap: u32,
    pub cooldown_days: u32,
}

impl SweepPolicy {
    pub const fn new(cap: u32, cooldown_days: u32) -> Self {
        Self { cap, cooldown_days }
    }

    /// Due when `count` is below the cap and at least `periods` cooldowns
    /// have elapsed since `anchor`.
    pub fn is_due(
        &self,
        anchor: DateTime<Utc>,
        count: u32,
        periods: u32,
        now: DateTime<Utc>,
    ) -> bool {
        count < self.cap && now - anchor >= self.window(periods)
    }

    fn window(&self, periods: u32) -> Duration {
        Duration::days(i64::from(periods) * i64::from(self.cooldown_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::days(day)
    }

    #[test]
    fn fresh_assignment_is_created() {
        assert_eq!(Invitation::default().state(), InvitationState::Created);
    }

    #[test]
    fn invite_stamps_and_counts() {
        let mut inv = Invitation::default();
        inv.invite(t(0), Some(AuthorId(4)));
        inv.invite(t(3), None);
        assert_eq!(inv.invite_count, 2);
        assert_eq!(inv.invited_at, Some(t(3)));
        assert_eq!(inv.invited_by, Some(AuthorId(4)));
        assert_eq!(inv.state(), InvitationState::Invited);
    }

    #[test]
    fn second_accept_does_not_restamp() {
        let mut inv = Invitation::default();
        inv.invite(t(0), None);
        assert!(inv.accept(t(1)));
        assert!(!inv.accept(t(2)));
        assert_eq!(inv.accepted_at, Some(t(1)));
    }

    #[test]
    fn reinvite_due_after_one_cooldown() {
        // invite_count=1, invited 5 days ago, cap=2/cooldown=5
        let policy = SweepPolicy::new(2, 5);
        let mut inv = Invitation::default();
        inv.invite(t(0), Some(AuthorId(1)));
        assert!(!inv.reinvite_due(&policy, t(4)));
        assert!(inv.reinvite_due(&policy, t(5)));

        inv.invite(t(5), None);
        assert_eq!(inv.invite_count, 2);
        assert_eq!(inv.invited_at, Some(t(5)));
        assert!(!inv.reinvite_due(&policy, t(100)));
    }

    #[test]
    fn reinvite_backs_off_with_count() {
        let policy = SweepPolicy::new(6, 7);
        let mut inv = Invitation::default();
        inv.invite(t(0), None);
        inv.invite(t(7), None);
        assert!(!inv.reinvite_due(&policy, t(20)));
        assert!(inv.reinvite_due(&policy, t(21)));
    }

    #[test]
    fn remind_only_after_acceptance_and_without_review() {
        let policy = SweepPolicy::new(6, 7);
        let mut inv = Invitation::default();
        inv.invite(t(0), None);
        assert!(!inv.remind_due(&policy, t(30), false));

        inv.accept(t(1));
        assert!(!inv.remind_due(&policy, t(7), false));
        assert!(inv.remind_due(&policy, t(8), false));
        assert!(!inv.remind_due(&policy, t(8), true));

        inv.remind();
        assert!(!inv.remind_due(&policy, t(14), false));
        assert!(inv.remind_due(&policy, t(15), false));
    }

    fn arb_invitation() -> impl Strategy<Value = Invitation> {
        (
            proptest::option::of(0i64..60),
            proptest::option::of(0i64..60),
            proptest::option::of(0i64..60),
            0u32..10,
            0u32..10,
        )
            .prop_map(|(invited, accepted, denied, invite_count, remind_count)| {
                // Only one of accepted/denied can be set on a real row.
                let denied = if accepted.is_some() { None } else { denied };
                Invitation {
                    invited_by: None,
                    invited_at: invited.map(t),
                    accepted_at: accepted.map(t),
                    denied_at: denied.map(t),
                    invite_count,
                    remind_count,
                }
            })
    }

    #[derive(Debug, Clone, Copy)]
    enum Response {
        Accept(i64),
        Deny(i64),
    }

    fn arb_response() -> impl Strategy<Value = Response> {
        prop_oneof![
            (0i64..30).prop_map(Response::Accept),
            (0i64..30).prop_map(Response::Deny),
        ]
    }

    proptest! {
        /// Property: the first response wins and every later one is a no-op.
        #[test]
        fn first_response_wins(responses in proptest::collection::vec(arb_response(), 1..6)) {
            let mut inv = Invitation::default();
            inv.invite(t(0), None);
            for response in &responses {
                match *response {
                    Response::Accept(day) => { inv.accept(t(day)); }
                    Response::Deny(day) => { inv.deny(t(day)); }
                }
            }
            match responses[0] {
                Response::Accept(day) => {
                    prop_assert_eq!(inv.accepted_at, Some(t(day)));
                    prop_assert_eq!(inv.denied_at, None);
                }
                Response::Deny(day) => {
                    prop_assert_eq!(inv.denied_at, Some(t(day)));
                    prop_assert_eq!(inv.accepted_at, None);
                }
            }
        }

        /// Property: N invites give invite_count == N and the last timestamp.
        #[test]
        fn invite_counts_every_call(days in proptest::collection::vec(0i64..100, 1..12)) {
            let mut inv = Invitation::default();
            for day in &days {
                inv.invite(t(*day), None);
            }
            prop_assert_eq!(inv.invite_count as usize, days.len());
            prop_assert_eq!(inv.invited_at, days.last().map(|d| t(*d)));
        }

        /// Property: the reinvite sweep never picks capped or answered rows.
        #[test]
        fn reinvite_never_selects_capped_or_answered(
            inv in arb_invitation(),
            cap in 0u32..8,
            cooldown in 0u32..10,
            now in 0i64..200,
        ) {
            let policy = SweepPolicy::new(cap, cooldown);
            if inv.reinvite_due(&policy, t(now)) {
                prop_assert!(inv.invite_count < cap);
                prop_assert!(inv.accepted_at.is_none());
                prop_assert!(inv.denied_at.is_none());
                prop_assert!(inv.invited_at.is_some());
            }
        }
    }
}
