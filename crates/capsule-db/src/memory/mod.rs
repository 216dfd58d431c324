//! In-memory backends
//!
//! Process-local implementations of the repository traits. They keep the same
//! atomicity and uniqueness guarantees as the Postgres schema, which makes them
//! suitable for tests and single-process development runs.

mod catalog;
mod cleanup;
mod idempotency;

pub use catalog::InMemoryCatalog;
pub use cleanup::InMemoryCleanupJobStore;
pub use idempotency::InMemoryIdempotencyStore;
