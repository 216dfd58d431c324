pub mod media_lifecycle;
pub mod publisher;
pub mod quota;

pub use media_lifecycle::{MediaLifecycleService, UploadMediaRequest};
pub use publisher::BatchPublisher;
pub use quota::QuotaService;
