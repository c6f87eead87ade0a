use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dispatch::MediaKind;
use crate::store::object_store::LocalFileStorage;
use crate::store::records::{AssetRecord, Company, EditRequestRecord, NewAsset, NewEditRequest};

const COMPANY_DIR: &str = "records/companies";
const ASSET_DIR: &str = "records/assets";
const EDIT_REQUEST_DIR: &str = "records/edit_requests";

/// Durable relational records: companies, assets and their edit requests.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_or_create_company(&self, name: &str) -> Result<Company>;

    async fn insert_asset(&self, asset: NewAsset) -> Result<AssetRecord>;

    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetRecord>>;

    /// Newest first.
    async fn list_assets(&self) -> Result<Vec<AssetRecord>>;

    /// Deletes the asset and, by cascade, every edit request under it.
    async fn delete_asset(&self, id: Uuid) -> Result<Option<AssetRecord>>;

    /// The parent, when given, must already exist under the same asset.
    async fn insert_edit_request(&self, request: NewEditRequest) -> Result<EditRequestRecord>;

    async fn get_edit_request(&self, id: Uuid) -> Result<Option<EditRequestRecord>>;

    /// Sets the derived media of a pending request. Resolved requests cannot be relinked.
    async fn link_derived_asset(
        &self,
        id: Uuid,
        derived_ref: &str,
        kind: MediaKind,
    ) -> Result<EditRequestRecord>;

    /// Oldest first.
    async fn list_edit_requests(&self, asset_id: Uuid) -> Result<Vec<EditRequestRecord>>;
}

/// Record store keeping one JSON document per row in the local file storage.
///
/// Writes are serialized; the lock also guards the last issued creation time
/// so rows created through one store are strictly ordered.
#[derive(Clone)]
pub struct JsonRecordStore {
    storage: Arc<LocalFileStorage>,
    write_lock: Arc<Mutex<DateTime<Utc>>>,
}

impl JsonRecordStore {
    pub fn new(storage: Arc<LocalFileStorage>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(DateTime::<Utc>::MIN_UTC)),
        }
    }

    fn next_timestamp(last: &mut DateTime<Utc>) -> DateTime<Utc> {
        let now = Utc::now();
        let next = if now > *last { now } else { *last + TimeDelta::microseconds(1) };
        *last = next;
        next
    }

    fn key(dir: &str, id: Uuid) -> String {
        format!("{dir}/{id}.json")
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write<T: serde::Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec_pretty(value)?;
        self.storage.put(key, &payload).await
    }

    /// Reads every row in `dir`, skipping documents that no longer parse.
    async fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for key in self.storage.list(dir, "json").await? {
            let Some(bytes) = self.storage.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<T>(&bytes) {
                Ok(row) => rows.push(row),
                Err(err) => tracing::warn!(%key, error = %err, "skipping unreadable record"),
            }
        }
        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn get_or_create_company(&self, name: &str) -> Result<Company> {
        let name = name.trim();
        if name.is_empty() {
            bail!("company name must not be empty");
        }
        let mut last = self.write_lock.lock().await;
        let companies: Vec<Company> = self.read_all(COMPANY_DIR).await?;
        if let Some(existing) = companies.into_iter().find(|company| company.name == name) {
            return Ok(existing);
        }
        let company = Company {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Self::next_timestamp(&mut last),
        };
        self.write(&Self::key(COMPANY_DIR, company.id), &company).await?;
        tracing::info!(company_id = %company.id, %name, "created company");
        Ok(company)
    }

    async fn insert_asset(&self, asset: NewAsset) -> Result<AssetRecord> {
        let mut last = self.write_lock.lock().await;
        let record = AssetRecord {
            id: Uuid::new_v4(),
            company_id: asset.company_id,
            title: asset.title,
            brand: asset.brand,
            primary_media_ref: asset.primary_media_ref,
            primary_media_kind: asset.primary_media_kind,
            location: asset.location,
            likes: asset.likes,
            created_at: Self::next_timestamp(&mut last),
        };
        self.write(&Self::key(ASSET_DIR, record.id), &record).await?;
        Ok(record)
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        self.read(&Self::key(ASSET_DIR, id)).await
    }

    async fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        let mut assets: Vec<AssetRecord> = self.read_all(ASSET_DIR).await?;
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(assets)
    }

    async fn delete_asset(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        let _guard = self.write_lock.lock().await;
        let Some(asset) = self.read::<AssetRecord>(&Self::key(ASSET_DIR, id)).await? else {
            return Ok(None);
        };
        let requests: Vec<EditRequestRecord> = self.read_all(EDIT_REQUEST_DIR).await?;
        for request in requests.iter().filter(|request| request.asset_id == id) {
            self.storage.delete(&Self::key(EDIT_REQUEST_DIR, request.id)).await?;
        }
        self.storage.delete(&Self::key(ASSET_DIR, id)).await?;
        Ok(Some(asset))
    }

    async fn insert_edit_request(&self, request: NewEditRequest) -> Result<EditRequestRecord> {
        let mut last = self.write_lock.lock().await;
        if self.read::<AssetRecord>(&Self::key(ASSET_DIR, request.asset_id)).await?.is_none() {
            bail!("asset {} does not exist", request.asset_id);
        }
        if let Some(parent_id) = request.parent_id {
            let parent: Option<EditRequestRecord> =
                self.read(&Self::key(EDIT_REQUEST_DIR, parent_id)).await?;
            match parent {
                Some(parent) if parent.asset_id == request.asset_id => {}
                Some(_) => bail!("parent request {parent_id} belongs to another asset"),
                None => bail!("parent request {parent_id} does not exist"),
            }
        }
        let record = EditRequestRecord {
            id: Uuid::new_v4(),
            asset_id: request.asset_id,
            user_id: request.user_id,
            parent_id: request.parent_id,
            prompt: request.prompt,
            source_ref: request.source_ref,
            derived_ref: None,
            derived_kind: None,
            created_at: Self::next_timestamp(&mut last),
        };
        self.write(&Self::key(EDIT_REQUEST_DIR, record.id), &record).await?;
        Ok(record)
    }

    async fn get_edit_request(&self, id: Uuid) -> Result<Option<EditRequestRecord>> {
        self.read(&Self::key(EDIT_REQUEST_DIR, id)).await
    }

    async fn link_derived_asset(
        &self,
        id: Uuid,
        derived_ref: &str,
        kind: MediaKind,
    ) -> Result<EditRequestRecord> {
        let _guard = self.write_lock.lock().await;
        let key = Self::key(EDIT_REQUEST_DIR, id);
        let mut record: EditRequestRecord = self
            .read(&key)
            .await?
            .ok_or_else(|| anyhow!("edit request {id} does not exist"))?;
        if record.is_resolved() {
            bail!("edit request {id} is already resolved");
        }
        record.derived_ref = Some(derived_ref.to_string());
        record.derived_kind = Some(kind);
        self.write(&key, &record).await?;
        Ok(record)
    }

    async fn list_edit_requests(&self, asset_id: Uuid) -> Result<Vec<EditRequestRecord>> {
        let mut requests: Vec<EditRequestRecord> = self
            .read_all(EDIT_REQUEST_DIR)
            .await?
            .into_iter()
            .filter(|request: &EditRequestRecord| request.asset_id == asset_id)
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(requests)
    }
}
