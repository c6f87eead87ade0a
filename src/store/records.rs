use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::MediaKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A remixable advertisement. Its media is an image or a video, never both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: Uuid,
    pub company_id: Uuid,
    pub title: String,
    pub brand: String,
    pub primary_media_ref: String,
    pub primary_media_kind: MediaKind,
    pub location: String,
    pub likes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAsset {
    pub company_id: Uuid,
    pub title: String,
    pub brand: String,
    pub primary_media_ref: String,
    pub primary_media_kind: MediaKind,
    pub location: String,
    pub likes: u32,
}

/// One remix prompt and, once generation succeeds, the media it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditRequestRecord {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub user_id: String,
    pub parent_id: Option<Uuid>,
    pub prompt: String,
    pub source_ref: String,
    pub derived_ref: Option<String>,
    pub derived_kind: Option<MediaKind>,
    pub created_at: DateTime<Utc>,
}

impl EditRequestRecord {
    pub fn is_resolved(&self) -> bool {
        self.derived_ref.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct NewEditRequest {
    pub asset_id: Uuid,
    pub user_id: String,
    pub parent_id: Option<Uuid>,
    pub prompt: String,
    pub source_ref: String,
}
