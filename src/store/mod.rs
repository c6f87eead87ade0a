pub mod hash;
pub mod object_store;
pub mod persistence;
pub mod record_store;
pub mod records;

use anyhow::Result;
use uuid::Uuid;

pub use hash::content_digest;
pub use object_store::{LocalFileStorage, ObjectStore, StoredObjectMetadata};
pub use persistence::AssetPersistence;
pub use record_store::{JsonRecordStore, RecordStore};
pub use records::*;

/// Deletes an asset with its edit requests, then the media objects they reference.
///
/// Media removal is best effort: the records are already gone when it runs.
pub async fn delete_asset_with_media(
    records: &dyn RecordStore,
    objects: &dyn ObjectStore,
    asset_id: Uuid,
) -> Result<Option<AssetRecord>> {
    let requests = records.list_edit_requests(asset_id).await?;
    let Some(asset) = records.delete_asset(asset_id).await? else {
        return Ok(None);
    };

    let media = std::iter::once(asset.primary_media_ref.as_str())
        .chain(requests.iter().filter_map(|request| request.derived_ref.as_deref()));
    for url in media {
        let Some(key) = objects.key_for_url(url) else {
            continue;
        };
        if let Err(err) = objects.remove(&key).await {
            tracing::warn!(%key, error = %err, "failed to remove media of deleted asset");
        }
    }
    tracing::info!(%asset_id, "deleted asset");
    Ok(Some(asset))
}
