//! Read-time reconciliation of an advertisement and its remix thread from
//! three sources: built-in seed data, the local cache, and the durable
//! record store.
//!
//! The asset header resolves as `remote ?? local ?? seed`, replacing the
//! whole header. Thread entries merge per id with the same precedence;
//! remote entries follow in creation order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::MediaKind;
use crate::store::{AssetRecord, EditRequestRecord, LocalFileStorage, RecordStore};

const LOCAL_CACHE_KEY: &str = "local/ad_pages.json";
const MAX_LEVEL: usize = 3;

/// Identifier in one of the three id spaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RecordId {
    Seed(u64),
    Durable(Uuid),
    Placeholder(String),
}

impl RecordId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(seed) = raw.parse::<u64>() {
            return RecordId::Seed(seed);
        }
        match Uuid::parse_str(raw) {
            Ok(id) => RecordId::Durable(id),
            Err(_) => RecordId::Placeholder(raw.to_string()),
        }
    }

    /// A locally generated id for prompts the record store could not accept.
    pub fn placeholder() -> Self {
        RecordId::Placeholder(format!("local-{}", Utc::now().timestamp_millis()))
    }

    pub fn as_durable(&self) -> Option<Uuid> {
        match self {
            RecordId::Durable(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Seed(id) => write!(f, "{id}"),
            RecordId::Durable(id) => write!(f, "{id}"),
            RecordId::Placeholder(id) => f.write_str(id),
        }
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl From<String> for RecordId {
    fn from(raw: String) -> Self {
        RecordId::parse(&raw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Seed,
    Local,
    Remote,
}

/// Display shape of an advertisement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetView {
    pub id: RecordId,
    pub title: String,
    pub brand: String,
    pub creator: String,
    pub media_ref: String,
    pub media_kind: MediaKind,
    pub location: String,
    pub likes: u32,
    pub tags: Vec<String>,
    pub current_edit: String,
}

impl AssetView {
    /// Shown while nothing is known about `id`.
    pub fn placeholder(id: RecordId) -> Self {
        Self {
            id,
            title: "Advertisement".to_string(),
            brand: "Brand".to_string(),
            creator: "User".to_string(),
            media_ref: "/placeholder.svg".to_string(),
            media_kind: MediaKind::Image,
            location: String::new(),
            likes: 0,
            tags: Vec::new(),
            current_edit: String::new(),
        }
    }

    pub fn from_record(record: &AssetRecord) -> Self {
        Self {
            id: RecordId::Durable(record.id),
            title: record.title.clone(),
            brand: record.brand.clone(),
            creator: record.brand.clone(),
            media_ref: record.primary_media_ref.clone(),
            media_kind: record.primary_media_kind,
            location: record.location.clone(),
            likes: record.likes,
            tags: Vec::new(),
            current_edit: String::new(),
        }
    }
}

/// Display shape of one remix prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub id: RecordId,
    pub parent_id: Option<RecordId>,
    pub author: String,
    pub prompt: String,
    pub likes: u32,
    pub verified: bool,
    pub derived_ref: Option<String>,
    pub derived_kind: Option<MediaKind>,
    pub created_at: Option<DateTime<Utc>>,
    pub source: EntrySource,
}

impl ThreadEntry {
    pub fn from_record(record: &EditRequestRecord) -> Self {
        Self {
            id: RecordId::Durable(record.id),
            parent_id: record.parent_id.map(RecordId::Durable),
            author: "User".to_string(),
            prompt: record.prompt.clone(),
            likes: 0,
            verified: true,
            derived_ref: record.derived_ref.clone(),
            derived_kind: record.derived_kind,
            created_at: Some(record.created_at),
            source: EntrySource::Remote,
        }
    }
}

/// Ordered, append-only entries of one asset. Parents are ids, never pointers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Thread {
    entries: Vec<ThreadEntry>,
    #[serde(skip)]
    index: HashMap<RecordId, usize>,
}

impl Thread {
    pub fn entries(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&ThreadEntry> {
        self.index.get(id).map(|&position| &self.entries[position])
    }

    /// Appends `entry`, or replaces the entry with the same id in place.
    pub fn upsert(&mut self, entry: ThreadEntry) {
        match self.index.get(&entry.id) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Records generated media on an entry already in the thread.
    pub fn set_derived(&mut self, id: &RecordId, derived_ref: &str, kind: MediaKind) -> bool {
        match self.index.get(id) {
            Some(&position) => {
                let entry = &mut self.entries[position];
                entry.derived_ref = Some(derived_ref.to_string());
                entry.derived_kind = Some(kind);
                true
            }
            None => false,
        }
    }

    /// Reply depth of `id`; parents missing from the thread end the chain.
    pub fn depth(&self, id: &RecordId) -> usize {
        let mut depth = 0;
        let mut current = self.get(id);
        while let Some(parent_id) = current.and_then(|entry| entry.parent_id.as_ref()) {
            if depth >= self.entries.len() {
                break;
            }
            current = self.get(parent_id);
            if current.is_none() {
                break;
            }
            depth += 1;
        }
        depth
    }

    pub fn level_label(&self, id: &RecordId) -> String {
        match self.depth(id) {
            0 => "Root".to_string(),
            depth => format!("Level {}", depth.min(MAX_LEVEL)),
        }
    }

    pub fn children_of<'a>(&'a self, id: &'a RecordId) -> impl Iterator<Item = &'a ThreadEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.parent_id.as_ref() == Some(id))
    }
}

/// Built-in demo advertisements, keyed by small numeric ids.
#[derive(Clone, Debug, Default)]
pub struct SeedCatalog {
    assets: BTreeMap<u64, AssetView>,
    threads: BTreeMap<u64, Vec<ThreadEntry>>,
}

impl SeedCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, asset: AssetView, thread: Vec<ThreadEntry>) -> Self {
        if let RecordId::Seed(id) = asset.id {
            self.assets.insert(id, asset);
            self.threads.insert(id, thread);
        }
        self
    }

    pub fn asset(&self, id: &RecordId) -> Option<&AssetView> {
        match id {
            RecordId::Seed(seed) => self.assets.get(seed),
            _ => None,
        }
    }

    pub fn thread(&self, id: &RecordId) -> &[ThreadEntry] {
        match id {
            RecordId::Seed(seed) => self.threads.get(seed).map(Vec::as_slice).unwrap_or(&[]),
            _ => &[],
        }
    }

    pub fn builtin() -> Self {
        let asset = |id: u64, title: &str, brand: &str, creator: &str, image: &str, edit: &str, likes: u32, tags: &[&str]| {
            AssetView {
                id: RecordId::Seed(id),
                title: title.to_string(),
                brand: brand.to_string(),
                creator: creator.to_string(),
                media_ref: image.to_string(),
                media_kind: MediaKind::from_reference(image),
                location: String::new(),
                likes,
                tags: tags.iter().map(|tag| tag.to_string()).collect(),
                current_edit: edit.to_string(),
            }
        };
        let entry = |id: u64, parent: Option<u64>, author: &str, prompt: &str, likes: u32, verified: bool| {
            ThreadEntry {
                id: RecordId::Seed(id),
                parent_id: parent.map(RecordId::Seed),
                author: author.to_string(),
                prompt: prompt.to_string(),
                likes,
                verified,
                derived_ref: None,
                derived_kind: None,
                created_at: None,
                source: EntrySource::Seed,
            }
        };

        Self::empty()
            .with_asset(
                asset(1, "Nike Athletic Excellence", "Nike", "Sarah Johnson",
                    "/nike-athletic-shoe-advertisement.jpg", "Make the shoes glow with neon colors",
                    3421, &["nike", "athletic"]),
                vec![
                    entry(1, None, "Bob", "Make the shoes glow with neon colors", 12, true),
                    entry(2, Some(1), "Anna Banana", "Add lightning bolts around the shoes", 8, true),
                    entry(3, Some(2), "Caty", "Make the background a futuristic city", 15, true),
                    entry(4, Some(3), "LALA", "Add flying cars in the background", 6, true),
                    entry(5, Some(1), "Steph Curry", "Change the shoes to gold metallic", 4, false),
                    entry(6, None, "Camilla Cambello", "Turn this into a vintage 80s aesthetic", 9, true),
                ],
            )
            .with_asset(
                asset(2, "iPhone Innovation", "Apple", "Michael Chen",
                    "/apple-iphone-product-advertisement.jpg", "Add holographic display effects",
                    5234, &["apple", "tech"]),
                Vec::new(),
            )
            .with_asset(
                asset(3, "Coca-Cola Happiness", "Coca-Cola", "Emma Davis",
                    "/coca-cola-super-bowl-commercial.jpg", "Transform the bottle into a rocket ship",
                    6789, &["coca-cola", "super-bowl"]),
                Vec::new(),
            )
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalCacheDocument {
    #[serde(default)]
    assets: BTreeMap<String, AssetView>,
    #[serde(default)]
    threads: BTreeMap<String, Vec<ThreadEntry>>,
}

/// Locally persisted overrides, one JSON document in the local file storage.
#[derive(Clone)]
pub struct LocalCache {
    storage: Arc<LocalFileStorage>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl LocalCache {
    pub fn new(storage: Arc<LocalFileStorage>) -> Self {
        Self {
            storage,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Unreadable caches read as empty.
    async fn load(&self) -> LocalCacheDocument {
        match self.storage.get(LOCAL_CACHE_KEY).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "local cache is corrupt, ignoring it");
                LocalCacheDocument::default()
            }),
            Ok(None) => LocalCacheDocument::default(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to read local cache");
                LocalCacheDocument::default()
            }
        }
    }

    async fn store(&self, document: &LocalCacheDocument) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(document)?;
        self.storage.put(LOCAL_CACHE_KEY, &bytes).await
    }

    pub async fn asset(&self, id: &RecordId) -> Option<AssetView> {
        self.load().await.assets.get(&id.to_string()).cloned()
    }

    pub async fn thread(&self, id: &RecordId) -> Vec<ThreadEntry> {
        self.load().await.threads.remove(&id.to_string()).unwrap_or_default()
    }

    pub async fn save_asset(&self, asset: &AssetView) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await;
        document.assets.insert(asset.id.to_string(), asset.clone());
        self.store(&document).await
    }

    /// Appends or replaces (by id) an entry of the asset's local thread.
    pub async fn save_entry(&self, asset_id: &RecordId, entry: ThreadEntry) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await;
        let entries = document.threads.entry(asset_id.to_string()).or_default();
        match entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        self.store(&document).await
    }
}

/// Header and thread for one advertisement page.
#[derive(Clone, Debug, Serialize)]
pub struct AssetPage {
    pub asset: AssetView,
    pub thread: Thread,
}

#[derive(Clone)]
pub struct ThreadMerger {
    seed: SeedCatalog,
    local: LocalCache,
    records: Arc<dyn RecordStore>,
}

impl ThreadMerger {
    pub fn new(seed: SeedCatalog, local: LocalCache, records: Arc<dyn RecordStore>) -> Self {
        Self { seed, local, records }
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    async fn remote_asset(&self, id: &RecordId) -> Option<AssetView> {
        let durable = id.as_durable()?;
        match self.records.get_asset(durable).await {
            Ok(record) => record.as_ref().map(AssetView::from_record),
            Err(err) => {
                tracing::warn!(asset_id = %durable, error = %err, "remote asset unavailable, using fallback data");
                None
            }
        }
    }

    async fn remote_thread(&self, id: &RecordId) -> Vec<ThreadEntry> {
        let Some(durable) = id.as_durable() else {
            return Vec::new();
        };
        match self.records.list_edit_requests(durable).await {
            Ok(records) => records.iter().map(ThreadEntry::from_record).collect(),
            Err(err) => {
                tracing::warn!(asset_id = %durable, error = %err, "failed to load remote thread");
                Vec::new()
            }
        }
    }

    /// `remote ?? local ?? seed`, evaluated fresh on every call.
    pub async fn resolve_asset(&self, id: &RecordId) -> Option<AssetView> {
        if let Some(remote) = self.remote_asset(id).await {
            return Some(remote);
        }
        if let Some(local) = self.local.asset(id).await {
            return Some(local);
        }
        self.seed.asset(id).cloned()
    }

    /// Seed and local entries first, then remote entries by creation time.
    /// A remote entry takes over any seed or local entry with its id.
    pub async fn merge_thread(&self, id: &RecordId) -> Thread {
        let mut remote = self.remote_thread(id).await;
        remote.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let remote_ids: HashSet<RecordId> = remote.iter().map(|entry| entry.id.clone()).collect();

        let mut thread = Thread::default();
        let seed = self.seed.thread(id).iter().cloned();
        for entry in seed.chain(self.local.thread(id).await) {
            if !remote_ids.contains(&entry.id) {
                thread.upsert(entry);
            }
        }
        for entry in remote {
            thread.upsert(entry);
        }
        thread
    }

    pub async fn load_page(&self, id: &RecordId) -> AssetPage {
        let asset = self
            .resolve_asset(id)
            .await
            .unwrap_or_else(|| AssetView::placeholder(id.clone()));
        let thread = self.merge_thread(id).await;
        AssetPage { asset, thread }
    }
}
