//! Store backend metrics.
//!
//! Requests are labelled by collection so contention on the exchange and
//! lock collections can be told apart from ordinary user traffic.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::error::FirestoreError;

pub const STORE_REQUESTS: &str = "vswap_store_requests_total";
pub const STORE_LATENCY: &str = "vswap_store_request_seconds";
pub const STORE_RETRIES: &str = "vswap_store_retries_total";
pub const COMMIT_WRITES: &str = "vswap_store_commit_writes_total";

/// How a commit ended, as seen by the market layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A create hit an existing document (duplicate lock, rating or video).
    Conflict,
    /// A version or existence precondition failed.
    Contention,
    Failed,
}

impl CommitOutcome {
    pub fn of<T>(result: &Result<T, FirestoreError>) -> Self {
        match result {
            Ok(_) => Self::Committed,
            Err(e) if e.is_already_exists() => Self::Conflict,
            Err(e) if e.is_precondition_failed() => Self::Contention,
            Err(_) => Self::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Conflict => "conflict",
            Self::Contention => "contention",
            Self::Failed => "failed",
        }
    }
}

pub fn record_request(operation: &str, collection: &str, status: u16, elapsed: Duration) {
    let status = status.to_string();
    counter!(
        STORE_REQUESTS,
        "operation" => operation.to_string(),
        "collection" => collection.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(STORE_LATENCY, "collection" => collection.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(STORE_RETRIES, "operation" => operation.to_string()).increment(1);
}

pub fn record_commit(writes: usize, outcome: CommitOutcome) {
    counter!(COMMIT_WRITES, "outcome" => outcome.as_str()).increment(writes as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_outcome_classification() {
        let ok: Result<(), FirestoreError> = Ok(());
        assert_eq!(CommitOutcome::of(&ok), CommitOutcome::Committed);

        let exists: Result<(), _> = Err(FirestoreError::from_http_status(409, "ALREADY_EXISTS"));
        assert_eq!(CommitOutcome::of(&exists), CommitOutcome::Conflict);

        let stale: Result<(), _> = Err(FirestoreError::from_http_status(400, "FAILED_PRECONDITION"));
        assert_eq!(CommitOutcome::of(&stale), CommitOutcome::Contention);

        let down: Result<(), _> = Err(FirestoreError::from_http_status(503, "unavailable"));
        assert_eq!(CommitOutcome::of(&down), CommitOutcome::Failed);
    }
}
