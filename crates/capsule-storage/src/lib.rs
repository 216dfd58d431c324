//! Capsule Storage Library
//!
//! Blob store abstraction for media bytes, with a CDN adapter for production and a
//! local filesystem adapter for development.
//!
//! # External ids
//!
//! Each backend hands out its own opaque `external_id` on upload. The catalog stores
//! it verbatim and passes it back on deletion; callers never build ids themselves.

#[cfg(feature = "storage-cdn")]
pub mod cdn;
pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use capsule_core::BlobBackend;
#[cfg(feature = "storage-cdn")]
pub use cdn::CdnBlobStore;
pub use factory::create_blob_store;
#[cfg(feature = "storage-local")]
pub use local::LocalBlobStore;
pub use traits::{BlobStore, StorageError, StorageResult, UploadedBlob};
