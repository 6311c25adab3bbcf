//! Ownership swap performed when an exchange is accepted.
//!
//! The swap is computed as one list of mutations so the store can apply it
//! atomically: both videos gain a new owner at the end of their history, both
//! libraries trade one video for the other, the exchange records the decision
//! and the pending-pair lock is released. Every record is preconditioned on
//! the version it was read at.

use vswap_models::{Exchange, ExchangeStatus, User, Video};
use vswap_store::{LockKey, Mutation, Precondition, Versioned};

use crate::error::{ApiError, ApiResult};

/// Records an accepted exchange touches, as read before the decision.
#[derive(Debug, Clone)]
pub struct SwapParties {
    /// Exchange already moved to `accepted`, with its pre-decision version.
    pub exchange: Versioned<Exchange>,
    pub initiator: Versioned<User>,
    pub responder: Versioned<User>,
    pub initiator_video: Versioned<Video>,
    pub responder_video: Versioned<Video>,
}

/// Build the atomic commit for an accepted exchange.
pub fn plan_swap(parties: SwapParties, at: chrono::DateTime<chrono::Utc>) -> ApiResult<Vec<Mutation>> {
    let SwapParties {
        exchange,
        initiator,
        responder,
        initiator_video,
        responder_video,
    } = parties;

    let ex = &exchange.value;
    if ex.status != ExchangeStatus::Accepted {
        return Err(ApiError::internal(format!(
            "Exchange {} must be accepted before ownership moves",
            ex.id
        )));
    }
    if ex.initiator_video.as_ref() != Some(&initiator_video.value.id) || ex.responder_video != responder_video.value.id {
        return Err(ApiError::internal(format!(
            "Swap records do not match exchange {}",
            ex.id
        )));
    }
    if initiator.value.uid != ex.initiator || responder.value.uid != ex.responder {
        return Err(ApiError::internal(format!(
            "Swap parties do not match exchange {}",
            ex.id
        )));
    }

    if !initiator_video.value.is_owned_by(&ex.initiator) {
        return Err(ApiError::validation(format!(
            "Video {} is not in the initiator's library",
            initiator_video.value.id
        )));
    }
    if !responder_video.value.is_owned_by(&ex.responder) {
        return Err(ApiError::conflict(format!(
            "Video {} is no longer owned by the responder",
            responder_video.value.id
        )));
    }

    let Versioned { value: mut iv, version: iv_version } = initiator_video;
    let Versioned { value: mut rv, version: rv_version } = responder_video;
    let Versioned { value: mut initiator_user, version: initiator_version } = initiator;
    let Versioned { value: mut responder_user, version: responder_version } = responder;

    iv.hand_over_to(ex.responder.clone());
    rv.hand_over_to(ex.initiator.clone());

    initiator_user.remove_video(&iv.id);
    initiator_user.add_video(rv.id.clone());
    initiator_user.updated_at = at;

    responder_user.remove_video(&rv.id);
    responder_user.add_video(iv.id.clone());
    responder_user.updated_at = at;

    let lock = LockKey::pending_pair(&ex.initiator, &ex.responder);
    let Versioned { value: exchange, version: exchange_version } = exchange;

    Ok(vec![
        Mutation::put_exchange(exchange, Precondition::Version(exchange_version)),
        Mutation::ReleaseLock { key: lock },
        Mutation::put_video(iv, Precondition::Version(iv_version)),
        Mutation::put_video(rv, Precondition::Version(rv_version)),
        Mutation::put_user(initiator_user, Precondition::Version(initiator_version)),
        Mutation::put_user(responder_user, Precondition::Version(responder_version)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vswap_models::{ExchangeDecision, VideoId};
    use vswap_store::Version;

    fn versioned<T>(value: T) -> Versioned<T> {
        Versioned::new(value, Version::new("1"))
    }

    fn parties() -> SwapParties {
        let now = Utc::now();
        let x = Video::uploaded("u1", "X", 10, "hx", now);
        let y = Video::uploaded("u2", "Y", 20, "hy", now);

        let mut u1 = User::new("u1", None, now);
        u1.add_video(x.id.clone());
        let mut u2 = User::new("u2", None, now);
        u2.add_video(y.id.clone());

        let mut ex = Exchange::request("u1", "u2", y.id.clone(), now);
        ex.decide(
            ExchangeDecision::Accept {
                initiator_video: x.id.clone(),
            },
            now,
        )
        .unwrap();

        SwapParties {
            exchange: versioned(ex),
            initiator: versioned(u1),
            responder: versioned(u2),
            initiator_video: versioned(x),
            responder_video: versioned(y),
        }
    }

    #[test]
    fn test_swap_moves_both_videos_and_libraries() {
        let parties = parties();
        let x_id = parties.initiator_video.value.id.clone();
        let y_id = parties.responder_video.value.id.clone();

        let mutations = plan_swap(parties, Utc::now()).unwrap();
        assert_eq!(mutations.len(), 6);

        for m in &mutations {
            match m {
                Mutation::PutVideo { video, precondition } => {
                    assert!(matches!(precondition, Precondition::Version(_)));
                    assert!(video.owner_is_consistent());
                    if video.id == x_id {
                        assert_eq!(video.users, vec!["u1", "u2"]);
                    } else {
                        assert_eq!(video.id, y_id);
                        assert_eq!(video.users, vec!["u2", "u1"]);
                    }
                }
                Mutation::PutUser { user, .. } if user.uid == "u1" => {
                    assert_eq!(user.videos, vec![y_id.clone()]);
                }
                Mutation::PutUser { user, .. } => {
                    assert_eq!(user.videos, vec![x_id.clone()]);
                }
                Mutation::ReleaseLock { key } => {
                    assert_eq!(key, &LockKey::pending_pair("u1", "u2"));
                }
                Mutation::PutExchange { exchange, .. } => {
                    assert_eq!(exchange.status, ExchangeStatus::Accepted);
                }
                other => panic!("unexpected mutation {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_initiator_video_must_belong_to_initiator() {
        let mut parties = parties();
        parties.initiator_video.value.hand_over_to("u3");
        let err = plan_swap(parties, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn test_responder_video_must_still_belong_to_responder() {
        let mut parties = parties();
        parties.responder_video.value.hand_over_to("u3");
        let err = plan_swap(parties, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_pending_exchange_is_rejected() {
        let mut parties = parties();
        parties.exchange.value.status = ExchangeStatus::Pending;
        assert_eq!(plan_swap(parties, Utc::now()).unwrap_err().code(), "internal");
    }

    #[test]
    fn test_mismatched_video_is_rejected() {
        let mut parties = parties();
        parties.initiator_video.value.id = VideoId::from_string("other");
        assert!(plan_swap(parties, Utc::now()).is_err());
    }
}
