//! Fixed limits that are not configurable at runtime.

/// Moderation scores at or above this value reject the upload.
pub const MODERATION_SCORE_THRESHOLD: f64 = 0.9;

/// Header carrying the client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest idempotency key accepted from a client.
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 256;

/// Longest album title accepted by a metadata publish.
pub const MAX_ALBUM_TITLE_LENGTH: usize = 200;

/// Minutes to wait before each blob cleanup retry, indexed by `retry_count - 1`.
pub const CLEANUP_BACKOFF_LADDER_MINUTES: [i64; 6] = [1, 5, 15, 60, 360, 1440];

/// A cleanup job is marked failed once its retry count reaches this value.
pub const MAX_CLEANUP_RETRIES: i32 = 6;
