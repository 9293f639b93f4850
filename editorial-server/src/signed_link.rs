//! Signed accept/deny links sent with reviewer invitations.
//!
//! A link names the manuscript, the reviewer and the response, plus an
//! expiry; the signature is hex HMAC-SHA256 over all of them.

use chrono::{DateTime, Duration, Utc};
use editorial_core::{ManuscriptId, ReviewerRef};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::workflow::InviteResponse;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link signature is invalid")]
    BadSignature,

    #[error("link expired")]
    Expired,

    #[error("signing secret must not be empty")]
    EmptySecret,
}

/// The signed part of an invitation link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteLink {
    pub manuscript: ManuscriptId,
    pub response: InviteResponse,
    pub reviewer: ReviewerRef,
    /// Unix seconds.
    pub expires: i64,
}

impl InviteLink {
    fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.manuscript,
            self.response,
            self.reviewer.kind(),
            self.reviewer.raw_id(),
            self.expires
        )
    }
}

#[derive(Clone)]
pub struct LinkSigner {
    mac: HmacSha256,
    base_url: String,
    ttl: Duration,
}

impl LinkSigner {
    pub fn new(secret: &[u8], base_url: impl Into<String>, ttl: Duration) -> Result<Self, LinkError> {
        if secret.is_empty() {
            return Err(LinkError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| LinkError::EmptySecret)?;
        Ok(Self {
            mac,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
        })
    }

    pub fn sign(&self, link: &InviteLink) -> String {
        let mut mac = self.mac.clone();
        mac.update(link.canonical().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check the signature in constant time, then the expiry.
    pub fn verify(
        &self,
        link: &InviteLink,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        let signature = hex::decode(signature).map_err(|_| LinkError::BadSignature)?;
        let mut mac = self.mac.clone();
        mac.update(link.canonical().as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| LinkError::BadSignature)?;

        if now.timestamp() > link.expires {
            return Err(LinkError::Expired);
        }
        Ok(())
    }

    pub fn issue(
        &self,
        manuscript: ManuscriptId,
        reviewer: ReviewerRef,
        response: InviteResponse,
        now: DateTime<Utc>,
    ) -> InviteLink {
        InviteLink {
            manuscript,
            response,
            reviewer,
            expires: (now + self.ttl).timestamp(),
        }
    }

    /// Full URL for the invitation responder route.
    pub fn url(
        &self,
        manuscript: ManuscriptId,
        reviewer: ReviewerRef,
        response: InviteResponse,
        now: DateTime<Utc>,
    ) -> String {
        let link = self.issue(manuscript, reviewer, response, now);
        format!(
            "{}/invitations/{}/{}/{}/{}?expires={}&signature={}",
            self.base_url,
            link.manuscript,
            link.response,
            link.reviewer.kind(),
            link.reviewer.raw_id(),
            link.expires,
            self.sign(&link)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use editorial_core::GuestAuthorId;

    fn signer() -> LinkSigner {
        LinkSigner::new(b"test-secret", "https://journal.example/", Duration::days(14)).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn link() -> InviteLink {
        signer().issue(
            ManuscriptId(3),
            ReviewerRef::Guest(GuestAuthorId(9)),
            InviteResponse::Accept,
            now(),
        )
    }

    #[test]
    fn signed_link_verifies_until_expiry() {
        let s = signer();
        let link = link();
        let sig = s.sign(&link);
        assert_eq!(s.verify(&link, &sig, now()), Ok(()));
        assert_eq!(
            s.verify(&link, &sig, now() + Duration::days(14)),
            Ok(())
        );
        assert_eq!(
            s.verify(&link, &sig, now() + Duration::days(15)),
            Err(LinkError::Expired)
        );
    }

    #[test]
    fn tampering_breaks_the_signature() {
        let s = signer();
        let link = link();
        let sig = s.sign(&link);

        let denied = InviteLink {
            response: InviteResponse::Deny,
            ..link
        };
        assert_eq!(s.verify(&denied, &sig, now()), Err(LinkError::BadSignature));

        let extended = InviteLink {
            expires: link.expires + 86_400,
            ..link
        };
        assert_eq!(
            s.verify(&extended, &sig, now()),
            Err(LinkError::BadSignature)
        );

        assert_eq!(
            s.verify(&link, "not-hex", now()),
            Err(LinkError::BadSignature)
        );
    }

    #[test]
    fn other_secret_is_rejected() {
        let link = link();
        let sig = signer().sign(&link);
        let other = LinkSigner::new(b"other", "https://journal.example", Duration::days(14)).unwrap();
        assert_eq!(other.verify(&link, &sig, now()), Err(LinkError::BadSignature));
    }

    #[test]
    fn url_carries_every_signed_field() {
        let url = signer().url(
            ManuscriptId(3),
            ReviewerRef::Guest(GuestAuthorId(9)),
            InviteResponse::Deny,
            now(),
        );
        let expires = (now() + Duration::days(14)).timestamp();
        assert!(url.starts_with(&format!(
            "https://journal.example/invitations/3/deny/guest-author/9?expires={expires}&signature="
        )));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(
            LinkSigner::new(b"", "x", Duration::days(1)),
            Err(LinkError::EmptySecret)
        ));
    }
}
