//! Exchange records and the exchange lifecycle.
//!
//! ```text
//! pending ──accept──▶ accepted
//!    │
//!    ├────reject──▶ rejected
//!    │
//!    └────delete──▶ (record removed, initiator only)
//! ```
//!
//! `accepted` and `rejected` are terminal.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::video::VideoId;

/// Unique identifier for an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Exchange status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Pending => "pending",
            ExchangeStatus::Accepted => "accepted",
            ExchangeStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExchangeStatus::Pending),
            "accepted" => Some(ExchangeStatus::Accepted),
            "rejected" => Some(ExchangeStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeStatus::Pending)
    }

    /// Apply a responder decision. Only `pending` has outgoing transitions.
    pub fn transition(self, decision: &ExchangeDecision) -> Result<Self, TransitionError> {
        match (self, decision) {
            (ExchangeStatus::Pending, ExchangeDecision::Accept { .. }) => Ok(ExchangeStatus::Accepted),
            (ExchangeStatus::Pending, ExchangeDecision::Reject) => Ok(ExchangeStatus::Rejected),
            (current, decision) => Err(TransitionError::NotPending {
                current,
                action: decision.verb(),
            }),
        }
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors produced by the exchange state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Exchange is already {current}; only pending exchanges can be {action}")]
    NotPending {
        current: ExchangeStatus,
        action: &'static str,
    },

    #[error("Invalid exchange status '{0}': expected 'accepted' or 'rejected'")]
    InvalidStatus(String),

    #[error("An initiator video must be chosen to accept an exchange")]
    MissingInitiatorVideo,
}

/// A responder's decision on a pending exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeDecision {
    /// Accept, receiving `initiator_video` from the initiator.
    Accept { initiator_video: VideoId },
    Reject,
}

impl ExchangeDecision {
    /// Build a decision from a requested status value.
    pub fn parse(status: &str, initiator_video: Option<VideoId>) -> Result<Self, TransitionError> {
        match ExchangeStatus::parse(status) {
            Some(ExchangeStatus::Accepted) => match initiator_video {
                Some(initiator_video) => Ok(ExchangeDecision::Accept { initiator_video }),
                None => Err(TransitionError::MissingInitiatorVideo),
            },
            Some(ExchangeStatus::Rejected) => Ok(ExchangeDecision::Reject),
            _ => Err(TransitionError::InvalidStatus(status.to_string())),
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            ExchangeDecision::Accept { .. } => "accepted",
            ExchangeDecision::Reject => "rejected",
        }
    }
}

/// Which side of an exchange a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeRole {
    Initiator,
    Responder,
}

impl ExchangeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeRole::Initiator => "initiator",
            ExchangeRole::Responder => "responder",
        }
    }
}

/// Key identifying an unordered user pair. Used to hold the pending-pair lock.
///
/// Each uid is percent-encoded, so the `:` separator never occurs inside a
/// part and no two pairs share a key. The key is also a valid document id.
pub fn pair_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", urlencoding::encode(lo), urlencoding::encode(hi))
}

/// A one-for-one video exchange request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Exchange {
    pub id: ExchangeId,
    pub initiator: String,
    pub responder: String,
    /// Video offered by the responder, fixed at creation.
    pub responder_video: VideoId,
    /// Video the responder picks from the initiator's library, set on acceptance.
    #[serde(default)]
    pub initiator_video: Option<VideoId>,
    #[serde(default)]
    pub status: ExchangeStatus,
    pub requested_date: DateTime<Utc>,
    #[serde(default)]
    pub responded_date: Option<DateTime<Utc>>,
}

impl Exchange {
    /// Create a new pending exchange.
    pub fn request(
        initiator: impl Into<String>,
        responder: impl Into<String>,
        responder_video: VideoId,
        requested_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExchangeId::new(),
            initiator: initiator.into(),
            responder: responder.into(),
            responder_video,
            initiator_video: None,
            status: ExchangeStatus::Pending,
            requested_date,
            responded_date: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ExchangeStatus::Pending
    }

    /// Apply a responder decision.
    pub fn decide(&mut self, decision: ExchangeDecision, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = self.status.transition(&decision)?;
        if let ExchangeDecision::Accept { initiator_video } = decision {
            self.initiator_video = Some(initiator_video);
        }
        self.responded_date = Some(at);
        Ok(())
    }

    /// Deletion is only possible while pending.
    pub fn ensure_deletable(&self) -> Result<(), TransitionError> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(TransitionError::NotPending {
                current: self.status,
                action: "deleted",
            })
        }
    }

    /// Role of `uid` in this exchange, if they are a party to it.
    pub fn role_of(&self, uid: &str) -> Option<ExchangeRole> {
        if self.initiator == uid {
            Some(ExchangeRole::Initiator)
        } else if self.responder == uid {
            Some(ExchangeRole::Responder)
        } else {
            None
        }
    }

    /// The other party, from `uid`'s point of view.
    pub fn counterparty(&self, uid: &str) -> Option<&str> {
        match self.role_of(uid)? {
            ExchangeRole::Initiator => Some(&self.responder),
            ExchangeRole::Responder => Some(&self.initiator),
        }
    }

    /// The video `uid` received once the exchange was accepted.
    pub fn video_received_by(&self, uid: &str) -> Option<&VideoId> {
        if self.status != ExchangeStatus::Accepted {
            return None;
        }
        match self.role_of(uid)? {
            ExchangeRole::Initiator => Some(&self.responder_video),
            ExchangeRole::Responder => self.initiator_video.as_ref(),
        }
    }

    pub fn pair_key(&self) -> String {
        pair_key(&self.initiator, &self.responder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Exchange {
        Exchange::request("u1", "u2", VideoId::from_string("v2"), Utc::now())
    }

    #[test]
    fn test_new_exchange_is_pending_without_initiator_video() {
        let ex = pending();
        assert_eq!(ex.status, ExchangeStatus::Pending);
        assert!(ex.initiator_video.is_none());
        assert!(ex.responded_date.is_none());
    }

    #[test]
    fn test_accept_sets_initiator_video() {
        let mut ex = pending();
        ex.decide(
            ExchangeDecision::Accept {
                initiator_video: VideoId::from_string("v1"),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(ex.status, ExchangeStatus::Accepted);
        assert_eq!(ex.initiator_video, Some(VideoId::from_string("v1")));
        assert!(ex.responded_date.is_some());
    }

    #[test]
    fn test_reject_is_terminal() {
        let mut ex = pending();
        ex.decide(ExchangeDecision::Reject, Utc::now()).unwrap();
        assert_eq!(ex.status, ExchangeStatus::Rejected);
        assert!(ex.status.is_terminal());
        assert!(ex.initiator_video.is_none());
    }

    #[test]
    fn test_terminal_states_reject_every_action() {
        for terminal in [ExchangeStatus::Accepted, ExchangeStatus::Rejected] {
            let mut ex = pending();
            ex.status = terminal;

            let accept = ex.clone().decide(
                ExchangeDecision::Accept {
                    initiator_video: VideoId::from_string("v1"),
                },
                Utc::now(),
            );
            assert!(matches!(accept, Err(TransitionError::NotPending { .. })));

            let reject = ex.clone().decide(ExchangeDecision::Reject, Utc::now());
            assert!(matches!(reject, Err(TransitionError::NotPending { .. })));

            assert!(matches!(
                ex.ensure_deletable(),
                Err(TransitionError::NotPending { action: "deleted", .. })
            ));
        }
    }

    #[test]
    fn test_failed_transition_leaves_exchange_untouched() {
        let mut ex = pending();
        ex.status = ExchangeStatus::Rejected;
        let before = ex.clone();
        let _ = ex.decide(
            ExchangeDecision::Accept {
                initiator_video: VideoId::from_string("v1"),
            },
            Utc::now(),
        );
        assert_eq!(ex, before);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(
            ExchangeDecision::parse("rejected", None),
            Ok(ExchangeDecision::Reject)
        );
        assert_eq!(
            ExchangeDecision::parse("accepted", Some(VideoId::from_string("v1"))),
            Ok(ExchangeDecision::Accept {
                initiator_video: VideoId::from_string("v1")
            })
        );
        assert_eq!(
            ExchangeDecision::parse("accepted", None),
            Err(TransitionError::MissingInitiatorVideo)
        );
        assert_eq!(
            ExchangeDecision::parse("pending", None),
            Err(TransitionError::InvalidStatus("pending".to_string()))
        );
        assert!(matches!(
            ExchangeDecision::parse("maybe", None),
            Err(TransitionError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_roles() {
        let ex = pending();
        assert_eq!(ex.role_of("u1"), Some(ExchangeRole::Initiator));
        assert_eq!(ex.role_of("u2"), Some(ExchangeRole::Responder));
        assert_eq!(ex.role_of("u3"), None);
        assert_eq!(ex.counterparty("u1"), Some("u2"));
        assert_eq!(ex.counterparty("u2"), Some("u1"));
    }

    #[test]
    fn test_video_received_by() {
        let mut ex = pending();
        assert!(ex.video_received_by("u1").is_none());
        ex.decide(
            ExchangeDecision::Accept {
                initiator_video: VideoId::from_string("v1"),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(ex.video_received_by("u1"), Some(&VideoId::from_string("v2")));
        assert_eq!(ex.video_received_by("u2"), Some(&VideoId::from_string("v1")));
        assert_eq!(ex.video_received_by("u3"), None);
    }

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(pair_key("a", "b"), pair_key("b", "a"));
        assert_eq!(pair_key("a", "b"), "a:b");
    }

    #[test]
    fn test_pair_key_separates_uids_with_delimiters() {
        assert_ne!(pair_key("a_b", "c"), pair_key("a", "b_c"));
        assert_ne!(pair_key("a:b", "c"), pair_key("a", "b:c"));
        assert_eq!(pair_key("org/a", "b"), "b:org%2Fa");
    }
}
