use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::dispatch::MediaKind;
use crate::error::{RemixError, Result};
use crate::image_processing::extension_for_mime_type;
use crate::store::object_store::ObjectStore;
use crate::store::record_store::RecordStore;
use crate::store::records::EditRequestRecord;

/// Uploads derived media and links it to the edit request that produced it.
#[derive(Clone)]
pub struct AssetPersistence {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
}

impl AssetPersistence {
    pub fn new(objects: Arc<dyn ObjectStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { objects, records }
    }

    /// Stores `bytes` under a fresh timestamped name and returns its public URL.
    /// `kind` is the generation path that produced them, not a guess from the bytes.
    pub async fn persist(&self, bytes: &[u8], mime_type: &str, kind: MediaKind) -> Result<String> {
        let key = derived_object_key(kind, mime_type);
        self.objects
            .upload(&key, bytes, mime_type)
            .await
            .map_err(|err| RemixError::StorageUpload(format!("{key}: {err}")))?;
        let url = self.objects.public_url(&key);
        tracing::info!(%key, %url, bytes = bytes.len(), "stored derived media");
        Ok(url)
    }

    pub async fn link(
        &self,
        request_id: Uuid,
        durable_ref: &str,
        kind: MediaKind,
    ) -> Result<EditRequestRecord> {
        self.records
            .link_derived_asset(request_id, durable_ref, kind)
            .await
            .map_err(|err| {
                tracing::error!(
                    %request_id,
                    orphaned_ref = durable_ref,
                    error = %err,
                    "stored media could not be linked"
                );
                RemixError::LinkWrite {
                    request_id: request_id.to_string(),
                    orphaned_ref: durable_ref.to_string(),
                    reason: err.to_string(),
                }
            })
    }
}

/// `edited/<millis>-<suffix>.<ext>` for images, `edited-videos/...` for videos.
pub fn derived_object_key(kind: MediaKind, mime_type: &str) -> String {
    let dir = match kind {
        MediaKind::Image => "edited",
        MediaKind::Video => "edited-videos",
    };
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{dir}/{}-{}.{}",
        Utc::now().timestamp_millis(),
        &suffix[..7],
        extension_for_mime_type(mime_type)
    )
}
