//! Drives one remix from prompt to displayed result and owns the per-asset
//! display state that the outer surfaces observe.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatch::{EditPlan, MediaKind, plan_edit};
use crate::error::{RemixError, Result};
use crate::frame_sampler::{FrameSampler, VideoSource};
use crate::gemini::{ImageEdit, ImageEditor, MediaFetcher};
use crate::image_processing::{detect_mime_type, extension_for_mime_type, image_mime_from_reference};
use crate::job_poller::{JobPoller, LongRunningJobApi};
use crate::resolver::{self, Resolved};
use crate::store::{AssetPersistence, AssetRecord, NewEditRequest, RecordStore};
use crate::thread::{AssetPage, EntrySource, RecordId, ThreadEntry, ThreadMerger};
use crate::veo::{build_generation_payload, build_video_prompt};

const FRAMES_PER_VIDEO: usize = 2;
const DEFAULT_USER_ID: &str = "anonymous";

#[derive(Clone, Debug)]
pub struct RemixRequest {
    pub asset_id: String,
    pub prompt: String,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
}

/// A finished remix.
#[derive(Clone, Debug, Serialize)]
pub struct RemixOutcome {
    pub request_id: Uuid,
    pub asset_id: Uuid,
    pub kind: MediaKind,
    pub source_ref: String,
    pub derived_ref: String,
    pub mime_type: String,
    /// Vendor text for image edits that returned no new image.
    pub analysis: Option<String>,
    pub operation: Option<String>,
    pub polls: Option<u32>,
    /// False when a later-started request had already updated the display.
    pub displayed: bool,
}

/// What the display of one asset currently shows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DisplaySnapshot {
    pub is_processing: bool,
    pub processing_kind: Option<MediaKind>,
    /// `None` while the original media is shown.
    pub displayed_ref: Option<String>,
    pub showing_original: bool,
    pub selected_request: Option<Uuid>,
}

#[derive(Debug)]
struct DisplayState {
    in_flight: BTreeMap<u64, MediaKind>,
    displayed_ref: Option<String>,
    showing_original: bool,
    selected_request: Option<Uuid>,
    last_display_seq: u64,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            in_flight: BTreeMap::new(),
            displayed_ref: None,
            showing_original: true,
            selected_request: None,
            last_display_seq: 0,
        }
    }
}

impl DisplayState {
    fn snapshot(&self) -> DisplaySnapshot {
        DisplaySnapshot {
            is_processing: !self.in_flight.is_empty(),
            processing_kind: self.in_flight.values().next_back().copied(),
            displayed_ref: self.displayed_ref.clone(),
            showing_original: self.showing_original,
            selected_request: self.selected_request,
        }
    }
}

type DisplayMap = Arc<Mutex<HashMap<Uuid, DisplayState>>>;

fn lock_display(display: &DisplayMap) -> MutexGuard<'_, HashMap<Uuid, DisplayState>> {
    // A poisoned map only means a panic elsewhere; the state itself stays consistent.
    display.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks one request as in flight until it is finished or dropped.
struct InFlight {
    display: DisplayMap,
    asset_id: Uuid,
    sequence: u64,
    kind: MediaKind,
    armed: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(state) = lock_display(&self.display).get_mut(&self.asset_id) {
            state.in_flight.remove(&self.sequence);
        }
        tracing::warn!(asset_id = %self.asset_id, sequence = self.sequence, "remix abandoned before it finished");
    }
}

/// Intermediate result of a vendor path, before persistence.
struct Generated {
    bytes: Vec<u8>,
    mime_type: String,
    analysis: Option<String>,
    operation: Option<String>,
    polls: Option<u32>,
}

#[derive(Clone)]
pub struct RemixOrchestrator {
    sampler: FrameSampler,
    fetcher: Arc<dyn MediaFetcher>,
    persistence: AssetPersistence,
    records: Arc<dyn RecordStore>,
    threads: ThreadMerger,
    image_editor: Option<Arc<dyn ImageEditor>>,
    video_jobs: Option<JobPoller>,
    display: DisplayMap,
    sequence: Arc<AtomicU64>,
}

impl RemixOrchestrator {
    pub fn new(
        sampler: FrameSampler,
        fetcher: Arc<dyn MediaFetcher>,
        persistence: AssetPersistence,
        records: Arc<dyn RecordStore>,
        threads: ThreadMerger,
    ) -> Self {
        Self {
            sampler,
            fetcher,
            persistence,
            records,
            threads,
            image_editor: None,
            video_jobs: None,
            display: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_image_editor(mut self, editor: Arc<dyn ImageEditor>) -> Self {
        self.image_editor = Some(editor);
        self
    }

    pub fn with_video_jobs(mut self, api: Arc<dyn LongRunningJobApi>) -> Self {
        self.video_jobs = Some(JobPoller::new(api));
        self
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn threads(&self) -> &ThreadMerger {
        &self.threads
    }

    fn display(&self) -> MutexGuard<'_, HashMap<Uuid, DisplayState>> {
        lock_display(&self.display)
    }

    pub fn display_snapshot(&self, asset_id: Uuid) -> DisplaySnapshot {
        self.display()
            .get(&asset_id)
            .map(DisplayState::snapshot)
            .unwrap_or_else(|| DisplayState::default().snapshot())
    }

    /// Restores the original media on the display. Does not cancel in-flight work.
    pub fn show_original(&self, asset_id: Uuid) -> DisplaySnapshot {
        let mut display = self.display();
        let state = display.entry(asset_id).or_default();
        state.displayed_ref = None;
        state.showing_original = true;
        state.selected_request = None;
        state.snapshot()
    }

    /// Drops the display state of a deleted asset.
    pub fn forget_asset(&self, asset_id: Uuid) {
        self.display().remove(&asset_id);
    }

    /// Shows the media a resolved request produced.
    pub async fn select_request(&self, asset_id: Uuid, request_id: Uuid) -> Result<DisplaySnapshot> {
        let request = self
            .records
            .get_edit_request(request_id)
            .await
            .map_err(|err| RemixError::RecordStore(err.to_string()))?
            .filter(|request| request.asset_id == asset_id)
            .ok_or_else(|| {
                RemixError::InvalidReference(format!("request {request_id} does not belong to asset {asset_id}"))
            })?;
        let derived = request.derived_ref.ok_or_else(|| {
            RemixError::InvalidReference(format!("request {request_id} has no generated media"))
        })?;

        let mut display = self.display();
        let state = display.entry(asset_id).or_default();
        state.displayed_ref = Some(derived);
        state.showing_original = false;
        state.selected_request = Some(request_id);
        Ok(state.snapshot())
    }

    pub async fn load_page(&self, asset_id: &str) -> AssetPage {
        self.threads.load_page(&RecordId::parse(asset_id)).await
    }

    /// Starts a remix in the background. The handle resolves when it finishes.
    pub fn spawn_edit(&self, request: RemixRequest) -> JoinHandle<Result<RemixOutcome>> {
        let this = self.clone();
        tokio::spawn(async move { this.request_edit(request).await })
    }

    pub async fn request_edit(&self, request: RemixRequest) -> Result<RemixOutcome> {
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(RemixError::InvalidReference("prompt must not be empty".to_string()));
        }
        let asset = self.durable_asset(&request.asset_id).await?;
        let parent_id = match request.parent_id.as_deref() {
            Some(raw) => Some(self.durable_parent(asset.id, raw).await?),
            None => None,
        };

        let displayed = self.display_snapshot(asset.id).displayed_ref;
        let plan = plan_edit(&prompt, &asset.primary_media_ref, displayed.as_deref());
        self.ensure_vendor(plan.kind)?;

        let user_id = request.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_string());
        let pending = self
            .records
            .insert_edit_request(NewEditRequest {
                asset_id: asset.id,
                user_id: user_id.clone(),
                parent_id,
                prompt: plan.prompt.clone(),
                source_ref: plan.source_ref.clone(),
            })
            .await;
        let pending = match pending {
            Ok(record) => record,
            Err(err) => {
                self.keep_placeholder(&asset, parent_id, &user_id, &plan).await;
                return Err(RemixError::RecordStore(err.to_string()));
            }
        };

        let request_id = pending.id;
        let in_flight = self.begin(asset.id, plan.kind);
        let span = tracing::info_span!("remix", %request_id, asset_id = %asset.id, kind = plan.kind.as_str());
        let result = self
            .generate_and_store(&asset, request_id, &plan)
            .instrument(span)
            .await;
        self.finish(in_flight, request_id, plan.source_ref, result)
    }

    async fn durable_asset(&self, raw: &str) -> Result<AssetRecord> {
        let Some(id) = RecordId::parse(raw).as_durable() else {
            return Err(RemixError::InvalidReference(format!(
                "asset {raw} has no durable record and cannot be remixed"
            )));
        };
        self.records
            .get_asset(id)
            .await
            .map_err(|err| RemixError::RecordStore(err.to_string()))?
            .ok_or_else(|| RemixError::InvalidReference(format!("asset {id} does not exist")))
    }

    async fn durable_parent(&self, asset_id: Uuid, raw: &str) -> Result<Uuid> {
        let Some(id) = RecordId::parse(raw).as_durable() else {
            return Err(RemixError::InvalidReference(format!(
                "parent {raw} has no durable record"
            )));
        };
        let parent = self
            .records
            .get_edit_request(id)
            .await
            .map_err(|err| RemixError::RecordStore(err.to_string()))?;
        match parent {
            Some(parent) if parent.asset_id == asset_id => Ok(id),
            _ => Err(RemixError::InvalidReference(format!(
                "parent {id} is not a request on asset {asset_id}"
            ))),
        }
    }

    fn ensure_vendor(&self, kind: MediaKind) -> Result<()> {
        let configured = match kind {
            MediaKind::Image => self.image_editor.is_some(),
            MediaKind::Video => self.video_jobs.is_some(),
        };
        if configured {
            Ok(())
        } else {
            Err(RemixError::Config(format!("no {} generation backend configured", kind.as_str())))
        }
    }

    /// Keeps an unsaved prompt visible in the local thread.
    async fn keep_placeholder(&self, asset: &AssetRecord, parent_id: Option<Uuid>, user_id: &str, plan: &EditPlan) {
        let entry = ThreadEntry {
            id: RecordId::placeholder(),
            parent_id: parent_id.map(RecordId::Durable),
            author: user_id.to_string(),
            prompt: plan.prompt.clone(),
            likes: 0,
            verified: false,
            derived_ref: None,
            derived_kind: None,
            created_at: Some(chrono::Utc::now()),
            source: EntrySource::Local,
        };
        tracing::warn!(asset_id = %asset.id, placeholder = %entry.id, "record store unavailable, prompt kept locally");
        if let Err(err) = self.threads.local().save_entry(&RecordId::Durable(asset.id), entry).await {
            tracing::warn!(asset_id = %asset.id, error = %err, "failed to cache placeholder prompt");
        }
    }

    fn begin(&self, asset_id: Uuid, kind: MediaKind) -> InFlight {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.display().entry(asset_id).or_default().in_flight.insert(sequence, kind);
        InFlight {
            display: self.display.clone(),
            asset_id,
            sequence,
            kind,
            armed: true,
        }
    }

    fn finish(
        &self,
        mut in_flight: InFlight,
        request_id: Uuid,
        source_ref: String,
        result: Result<(String, Generated)>,
    ) -> Result<RemixOutcome> {
        in_flight.armed = false;
        let (asset_id, sequence, kind) = (in_flight.asset_id, in_flight.sequence, in_flight.kind);
        let mut display = self.display();
        if let Some(state) = display.get_mut(&asset_id) {
            state.in_flight.remove(&sequence);
        }

        let (derived_ref, generated) = match result {
            Ok(done) => done,
            Err(err) => {
                tracing::error!(
                    %request_id,
                    %asset_id,
                    category = err.user_message(),
                    error = %err,
                    "remix failed"
                );
                return Err(err);
            }
        };

        let state = display.entry(asset_id).or_default();
        let displayed = sequence > state.last_display_seq;
        if displayed {
            state.last_display_seq = sequence;
            state.displayed_ref = Some(derived_ref.clone());
            state.showing_original = false;
            state.selected_request = Some(request_id);
        } else {
            tracing::info!(%request_id, %asset_id, "a newer remix is already displayed");
        }

        Ok(RemixOutcome {
            request_id,
            asset_id,
            kind,
            source_ref,
            derived_ref,
            mime_type: generated.mime_type,
            analysis: generated.analysis,
            operation: generated.operation,
            polls: generated.polls,
            displayed,
        })
    }

    async fn generate_and_store(
        &self,
        asset: &AssetRecord,
        request_id: Uuid,
        plan: &EditPlan,
    ) -> Result<(String, Generated)> {
        let generated = match plan.kind {
            MediaKind::Image => self.generate_image(plan).await?,
            MediaKind::Video => self.generate_video(asset, plan).await?,
        };
        let derived_ref = self
            .persistence
            .persist(&generated.bytes, &generated.mime_type, plan.kind)
            .await?;
        self.persistence.link(request_id, &derived_ref, plan.kind).await?;
        tracing::info!(%derived_ref, "remix stored and linked");
        Ok((derived_ref, generated))
    }

    async fn generate_image(&self, plan: &EditPlan) -> Result<Generated> {
        let editor = self
            .image_editor
            .as_ref()
            .ok_or_else(|| RemixError::Config("no image generation backend configured".to_string()))?;
        let source = self
            .fetcher
            .fetch(&plan.source_ref)
            .await
            .map_err(|err| RemixError::MediaLoad(format!("{}: {err}", plan.source_ref)))?;
        let source_mime = detect_mime_type(&source)
            .unwrap_or_else(|| image_mime_from_reference(&plan.source_ref))
            .to_string();

        let edit = editor
            .edit(&source, &source_mime, &plan.prompt)
            .await
            .map_err(|err| RemixError::JobSubmission(format!("image edit rejected: {err}")))?;
        Ok(match edit {
            ImageEdit::Edited { bytes, mime_type } => Generated {
                bytes,
                mime_type,
                analysis: None,
                operation: None,
                polls: None,
            },
            ImageEdit::AnalysisOnly { text } => {
                tracing::info!("image model returned text only, keeping the source image");
                Generated {
                    bytes: source,
                    mime_type: source_mime,
                    analysis: Some(text),
                    operation: None,
                    polls: None,
                }
            }
        })
    }

    async fn generate_video(&self, asset: &AssetRecord, plan: &EditPlan) -> Result<Generated> {
        let jobs = self
            .video_jobs
            .as_ref()
            .ok_or_else(|| RemixError::Config("no video generation backend configured".to_string()))?;

        let source = if is_http(&plan.source_ref) {
            VideoSource::Remote(plan.source_ref.clone())
        } else {
            let bytes = self
                .fetcher
                .fetch(&plan.source_ref)
                .await
                .map_err(|err| RemixError::MediaLoad(format!("{}: {err}", plan.source_ref)))?;
            let extension = detect_mime_type(&bytes)
                .map(extension_for_mime_type)
                .unwrap_or("mp4")
                .to_string();
            VideoSource::Local { bytes, extension }
        };
        let frames = self.sampler.sample(&source, FRAMES_PER_VIDEO).await?;

        let prompt = build_video_prompt(&plan.prompt, Some(&asset.brand));
        let payload = build_generation_payload(&prompt, &frames);
        let (job, result) = jobs.run(&payload).await?;

        let (bytes, mime_type) = match resolver::resolve(&result, MediaKind::Video.default_mime_type())? {
            Resolved::Inline { bytes, mime_type, .. } => (bytes, mime_type),
            Resolved::StorageRef { uri, mime_type } => {
                if !is_http(&uri) {
                    tracing::error!(operation = job.handle(), %uri, "result is only available in vendor storage");
                    return Err(RemixError::UnsupportedResultFormat(format!(
                        "storage reference {uri} cannot be downloaded"
                    )));
                }
                let bytes = self
                    .fetcher
                    .fetch(&uri)
                    .await
                    .map_err(|err| RemixError::UnsupportedResultFormat(format!("{uri}: {err}")))?;
                let mime_type = mime_type
                    .or_else(|| detect_mime_type(&bytes).map(str::to_string))
                    .unwrap_or_else(|| MediaKind::Video.default_mime_type().to_string());
                (bytes, mime_type)
            }
        };

        Ok(Generated {
            bytes,
            mime_type,
            analysis: None,
            operation: Some(job.handle().to_string()),
            polls: Some(job.poll_count()),
        })
    }
}

fn is_http(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
