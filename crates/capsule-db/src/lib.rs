//! Capsule persistence layer
//!
//! Repository traits for the media catalog, the cleanup job table and idempotency
//! records, with Postgres implementations and in-memory backends used by tests and
//! local development.

pub mod catalog;
pub mod cleanup;
pub mod idempotency;
pub mod memory;
pub mod setup;
pub mod transaction;

pub use catalog::{
    BatchOutcome, CatalogBatch, CatalogError, CatalogStatement, MediaCatalog, PgMediaCatalog,
};
pub use cleanup::{CleanupJobStore, PgCleanupJobStore};
pub use idempotency::{IdempotencyStore, PgIdempotencyStore};
pub use memory::{InMemoryCatalog, InMemoryCleanupJobStore, InMemoryIdempotencyStore};
pub use setup::setup_database;
