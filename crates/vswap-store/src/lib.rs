//! Persistence contract for the VideoSwap core.
//!
//! This crate provides:
//! - `MarketStore`, the async trait the services are written against
//! - `Mutation` / `Precondition`, the vocabulary of atomic commits
//! - `Versioned<T>` reads for optimistic concurrency
//! - `MemoryStore`, a complete in-process implementation

pub mod error;
pub mod memory;
pub mod mutation;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use mutation::{LockKey, Mutation, Precondition, RatingTarget};
pub use store::{MarketStore, Version, Versioned};
