//! Firestore REST API client.
//!
//! This crate provides:
//! - `FirestoreClient` with token caching, retry and request metrics
//! - Atomic commits with preconditions and field transforms
//! - Structured and count queries
//! - `FirestoreStore`, the Firestore implementation of `MarketStore`
//! - Firestore emulator support via `FIRESTORE_EMULATOR_HOST`

pub mod client;
pub mod convert;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;


pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use store::FirestoreStore;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
