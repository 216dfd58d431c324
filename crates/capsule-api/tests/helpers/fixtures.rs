//! Request builders.

use bytes::Bytes;
use capsule_api::UploadMediaRequest;
use capsule_core::models::MediaFile;

pub fn image_file() -> MediaFile {
    MediaFile::new("photo.jpg", "image/jpeg", Bytes::from(vec![0xFFu8; 2048]))
}

pub fn video_file() -> MediaFile {
    MediaFile::new("clip.mp4", "video/mp4", Bytes::from(vec![0x00u8; 4096]))
}

pub fn image_upload(album_id: i64) -> UploadMediaRequest {
    UploadMediaRequest {
        album_id: album_id.to_string(),
        file: Some(image_file()),
        display_order: 0,
        is_main_image: false,
        duration_seconds: None,
    }
}

pub fn main_image_upload(album_id: i64) -> UploadMediaRequest {
    UploadMediaRequest {
        is_main_image: true,
        ..image_upload(album_id)
    }
}

pub fn video_upload(album_id: i64, duration_seconds: i32) -> UploadMediaRequest {
    UploadMediaRequest {
        album_id: album_id.to_string(),
        file: Some(video_file()),
        display_order: 0,
        is_main_image: false,
        duration_seconds: Some(duration_seconds),
    }
}
