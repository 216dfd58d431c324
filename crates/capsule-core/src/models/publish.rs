use serde::{Deserialize, Serialize};

/// One entry of a metadata publish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataChange {
    Delete { media_id: i64 },
    Reorder { media_id: i64, display_order: i32 },
    SetMainImage { media_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOrderUpdate {
    pub media_id: i64,
    pub display_order: i32,
}

/// What a committed publish changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSummary {
    pub deleted: Vec<i64>,
    pub reordered: usize,
    pub main_image_id: Option<i64>,
    pub title_updated: bool,
    pub cleanup_scheduled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_change_wire_format() {
        let changes: Vec<MetadataChange> = serde_json::from_str(
            r#"[
                {"type": "delete", "media_id": 3},
                {"type": "reorder", "media_id": 4, "display_order": 1},
                {"type": "set_main_image", "media_id": 5}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            changes,
            vec![
                MetadataChange::Delete { media_id: 3 },
                MetadataChange::Reorder {
                    media_id: 4,
                    display_order: 1
                },
                MetadataChange::SetMainImage { media_id: 5 },
            ]
        );
    }
}
