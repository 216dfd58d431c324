pub mod idempotency;

pub use idempotency::idempotency_middleware;
