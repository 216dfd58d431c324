//! Data models for the media lifecycle
//!
//! Each sub-module covers one persisted record or request shape.

mod album;
mod cleanup;
mod idempotency;
mod media;
mod publish;

pub use album::*;
pub use cleanup::*;
pub use idempotency::*;
pub use media::*;
pub use publish::*;
