use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};
use tokio::sync::Notify;
use uuid::Uuid;

use konten_remix::RemixError;
use konten_remix::dispatch::MediaKind;
use konten_remix::frame_sampler::{FrameSampler, VideoDecoder};
use konten_remix::gemini::{ImageEdit, ImageEditor, MediaFetcher};
use konten_remix::job_poller::{LongRunningJobApi, MAX_POLLS, PollResponse};
use konten_remix::orchestrator::{RemixOrchestrator, RemixRequest};
use konten_remix::store::{
    AssetPersistence, AssetRecord, Company, EditRequestRecord, JsonRecordStore, LocalFileStorage,
    NewAsset, NewEditRequest, ObjectStore, RecordStore,
};
use konten_remix::thread::{LocalCache, SeedCatalog, ThreadMerger};

const MP4_BYTES: &[u8] = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00remixed-video";

fn png(shade: u8) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(4, 4, image::Rgb([shade, 64, 32]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[derive(Default)]
struct FakeDecoder {
    captured: Mutex<Vec<f64>>,
}

#[async_trait]
impl VideoDecoder for FakeDecoder {
    async fn probe_duration(&self, _input: &str) -> Result<f64> {
        Ok(10.0)
    }

    async fn capture_frame(&self, _input: &str, timestamp: f64) -> Result<Vec<u8>> {
        self.captured.lock().unwrap().push(timestamp);
        Ok(png(200))
    }
}

struct FakeFetcher;

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        if reference.ends_with(".mp4") {
            Ok(MP4_BYTES.to_vec())
        } else {
            Ok(png(120))
        }
    }
}

#[derive(Default)]
struct FakeEditor {
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    reject: AtomicBool,
}

#[async_trait]
impl ImageEditor for FakeEditor {
    async fn edit(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<ImageEdit> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        assert_eq!(mime_type, "image/png");
        assert!(!image.is_empty());
        if self.reject.load(Ordering::SeqCst) {
            return Err(anyhow!("quota exceeded"));
        }
        if prompt.contains("slow") {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
        Ok(ImageEdit::Edited { bytes: png(0), mime_type: "image/png".to_string() })
    }
}

/// Finishes on poll `done_on` with `response`, or never when `None`.
struct ScriptedJobs {
    done_on: Option<u32>,
    response: Value,
    polls: AtomicU32,
    submitted: Mutex<Option<Value>>,
}

impl ScriptedJobs {
    fn new(done_on: Option<u32>) -> Self {
        Self::with_response(
            done_on,
            json!({
                "candidates": [{"content": {"parts": [{"inlineData": {
                    "mimeType": "video/mp4",
                    "data": STANDARD.encode(MP4_BYTES)
                }}]}}]
            }),
        )
    }

    fn with_response(done_on: Option<u32>, response: Value) -> Self {
        Self { done_on, response, polls: AtomicU32::new(0), submitted: Mutex::new(None) }
    }
}

#[async_trait]
impl LongRunningJobApi for ScriptedJobs {
    async fn submit(&self, payload: &Value) -> Result<String> {
        *self.submitted.lock().unwrap() = Some(payload.clone());
        Ok("projects/p/locations/us-central1/operations/op-1".to_string())
    }

    async fn poll(&self, _handle: &str) -> Result<PollResponse> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.done_on != Some(poll) {
            return Ok(PollResponse { done: false, error: None, payload: json!({"done": false}) });
        }
        let payload = json!({
            "name": "op-1",
            "done": true,
            "response": self.response.clone()
        });
        Ok(PollResponse { done: true, error: None, payload })
    }
}

/// Object store whose uploads can be switched to fail.
struct FlakyObjects {
    inner: Arc<LocalFileStorage>,
    fail_uploads: AtomicBool,
}

#[async_trait]
impl ObjectStore for FlakyObjects {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(anyhow!("bucket unavailable"));
        }
        self.inner.upload(key, bytes, content_type).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    fn public_url(&self, key: &str) -> String {
        self.inner.public_url(key)
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        self.inner.key_for_url(url)
    }
}

/// Record store whose links or inserts can be switched to fail.
struct FlakyRecords {
    inner: JsonRecordStore,
    fail_links: AtomicBool,
    fail_inserts: AtomicBool,
}

#[async_trait]
impl RecordStore for FlakyRecords {
    async fn get_or_create_company(&self, name: &str) -> Result<Company> {
        self.inner.get_or_create_company(name).await
    }

    async fn insert_asset(&self, asset: NewAsset) -> Result<AssetRecord> {
        self.inner.insert_asset(asset).await
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        self.inner.get_asset(id).await
    }

    async fn list_assets(&self) -> Result<Vec<AssetRecord>> {
        self.inner.list_assets().await
    }

    async fn delete_asset(&self, id: Uuid) -> Result<Option<AssetRecord>> {
        self.inner.delete_asset(id).await
    }

    async fn insert_edit_request(&self, request: NewEditRequest) -> Result<EditRequestRecord> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("database offline"));
        }
        self.inner.insert_edit_request(request).await
    }

    async fn get_edit_request(&self, id: Uuid) -> Result<Option<EditRequestRecord>> {
        self.inner.get_edit_request(id).await
    }

    async fn link_derived_asset(&self, id: Uuid, derived_ref: &str, kind: MediaKind) -> Result<EditRequestRecord> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(anyhow!("write conflict"));
        }
        self.inner.link_derived_asset(id, derived_ref, kind).await
    }

    async fn list_edit_requests(&self, asset_id: Uuid) -> Result<Vec<EditRequestRecord>> {
        self.inner.list_edit_requests(asset_id).await
    }
}

struct Harness {
    orchestrator: RemixOrchestrator,
    records: Arc<FlakyRecords>,
    objects: Arc<FlakyObjects>,
    decoder: Arc<FakeDecoder>,
    editor: Arc<FakeEditor>,
    jobs: Arc<ScriptedJobs>,
}

fn harness(done_on: Option<u32>, gate: Option<Arc<Notify>>) -> Harness {
    harness_with(ScriptedJobs::new(done_on), gate)
}

fn harness_with(jobs: ScriptedJobs, gate: Option<Arc<Notify>>) -> Harness {
    let dir = std::env::temp_dir().join(format!("konten-remix-flow-{}", Uuid::new_v4().simple()));
    let storage = Arc::new(LocalFileStorage::new(dir.clone(), "http://localhost:3000/cache".to_string()));
    let records = Arc::new(FlakyRecords {
        inner: JsonRecordStore::new(storage.clone()),
        fail_links: AtomicBool::new(false),
        fail_inserts: AtomicBool::new(false),
    });
    let objects = Arc::new(FlakyObjects { inner: storage.clone(), fail_uploads: AtomicBool::new(false) });
    let decoder = Arc::new(FakeDecoder::default());
    let editor = Arc::new(FakeEditor { gate, ..Default::default() });
    let jobs = Arc::new(jobs);

    let record_store: Arc<dyn RecordStore> = records.clone();
    let object_store: Arc<dyn ObjectStore> = objects.clone();
    let threads = ThreadMerger::new(SeedCatalog::builtin(), LocalCache::new(storage), record_store.clone());
    let orchestrator = RemixOrchestrator::new(
        FrameSampler::new(decoder.clone(), dir.join("scratch")),
        Arc::new(FakeFetcher),
        AssetPersistence::new(object_store, record_store.clone()),
        record_store,
        threads,
    )
    .with_image_editor(editor.clone())
    .with_video_jobs(jobs.clone());

    Harness { orchestrator, records, objects, decoder, editor, jobs }
}

async fn seed_asset(records: &FlakyRecords, media_ref: &str) -> AssetRecord {
    let company = records.get_or_create_company("Nike").await.unwrap();
    records
        .insert_asset(NewAsset {
            company_id: company.id,
            title: "Nike Air".to_string(),
            brand: "Nike".to_string(),
            primary_media_ref: media_ref.to_string(),
            primary_media_kind: MediaKind::from_reference(media_ref),
            location: "Jakarta".to_string(),
            likes: 0,
        })
        .await
        .unwrap()
}

fn remix(asset: &AssetRecord, prompt: &str) -> RemixRequest {
    RemixRequest {
        asset_id: asset.id.to_string(),
        prompt: prompt.to_string(),
        parent_id: None,
        user_id: Some("tester".to_string()),
    }
}

#[tokio::test]
async fn image_remix_is_persisted_linked_and_displayed() {
    let h = harness(None, None);
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;

    let outcome = h.orchestrator.request_edit(remix(&asset, "make it black and white")).await.unwrap();

    assert_eq!(outcome.kind, MediaKind::Image);
    assert!(outcome.derived_ref.starts_with("http://localhost:3000/cache/edited/"));
    assert!(outcome.derived_ref.ends_with(".png"));
    assert!(outcome.displayed);
    assert_eq!(h.editor.prompts.lock().unwrap().as_slice(), ["make it black and white"]);
    assert_eq!(h.jobs.polls.load(Ordering::SeqCst), 0);

    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert!(!snapshot.is_processing);
    assert!(!snapshot.showing_original);
    assert_eq!(snapshot.displayed_ref.as_deref(), Some(outcome.derived_ref.as_str()));
    assert_eq!(snapshot.selected_request, Some(outcome.request_id));

    let stored = h.records.get_edit_request(outcome.request_id).await.unwrap().unwrap();
    assert_eq!(stored.derived_ref.as_deref(), Some(outcome.derived_ref.as_str()));
    assert_eq!(stored.derived_kind, Some(MediaKind::Image));
    assert_eq!(stored.source_ref, asset.primary_media_ref);

    let key = h.objects.key_for_url(&outcome.derived_ref).unwrap();
    assert!(h.objects.inner.exists(&key).await.unwrap());
}

#[tokio::test]
async fn follow_up_remixes_edit_the_displayed_result() {
    let h = harness(None, None);
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;

    let first = h.orchestrator.request_edit(remix(&asset, "make it black and white")).await.unwrap();
    let mut reply = remix(&asset, "add a sunset");
    reply.parent_id = Some(first.request_id.to_string());
    let second = h.orchestrator.request_edit(reply).await.unwrap();

    assert_eq!(second.source_ref, first.derived_ref);
    let stored = h.records.get_edit_request(second.request_id).await.unwrap().unwrap();
    assert_eq!(stored.parent_id, Some(first.request_id));

    let restored = h.orchestrator.show_original(asset.id);
    assert!(restored.showing_original);
    assert_eq!(restored.displayed_ref, None);
    let third = h.orchestrator.request_edit(remix(&asset, "neon")).await.unwrap();
    assert_eq!(third.source_ref, asset.primary_media_ref);
}

#[tokio::test(start_paused = true)]
async fn video_remix_samples_quarter_frames_and_polls_until_done() {
    let h = harness(Some(3), None);
    let asset = seed_asset(&h.records, "https://cdn.example.com/ads/nike.mp4").await;

    let outcome = h.orchestrator.request_edit(remix(&asset, "cyberpunk style")).await.unwrap();

    assert_eq!(h.decoder.captured.lock().unwrap().as_slice(), [2.5, 7.5]);
    assert_eq!(outcome.kind, MediaKind::Video);
    assert_eq!(outcome.polls, Some(3));
    assert_eq!(outcome.mime_type, "video/mp4");
    assert!(outcome.derived_ref.contains("/cache/edited-videos/"));
    assert!(outcome.derived_ref.ends_with(".mp4"));
    assert_eq!(h.jobs.polls.load(Ordering::SeqCst), 3);

    let submitted = h.jobs.submitted.lock().unwrap().clone().unwrap();
    let instance = &submitted["instances"][0];
    assert!(instance["prompt"].as_str().unwrap().contains("Nike"));
    assert!(instance["prompt"].as_str().unwrap().contains("cyberpunk style"));
    assert_eq!(instance["image"]["mimeType"], "image/jpeg");
    assert!(instance["lastFrame"]["bytesBase64Encoded"].is_string());

    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert!(!snapshot.is_processing);
    assert_eq!(snapshot.displayed_ref.as_deref(), Some(outcome.derived_ref.as_str()));
    let stored = h.records.get_edit_request(outcome.request_id).await.unwrap().unwrap();
    assert_eq!(stored.derived_kind, Some(MediaKind::Video));
}

#[tokio::test(start_paused = true)]
async fn video_remix_times_out_after_the_poll_ceiling() {
    let h = harness(None, None);
    let asset = seed_asset(&h.records, "https://cdn.example.com/ads/nike.mp4").await;

    let err = h.orchestrator.request_edit(remix(&asset, "cyberpunk style")).await.unwrap_err();

    match err {
        RemixError::JobTimeout { polls, .. } => assert_eq!(polls, MAX_POLLS),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(h.jobs.polls.load(Ordering::SeqCst), MAX_POLLS);
    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert!(!snapshot.is_processing);
    assert_eq!(snapshot.displayed_ref, None);

    let requests = h.records.list_edit_requests(asset.id).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].is_resolved());
}

#[tokio::test]
async fn failed_upload_or_link_leaves_the_display_alone() {
    let h = harness(None, None);
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;
    let shown = h.orchestrator.request_edit(remix(&asset, "make it black and white")).await.unwrap();

    h.objects.fail_uploads.store(true, Ordering::SeqCst);
    let err = h.orchestrator.request_edit(remix(&asset, "add rain")).await.unwrap_err();
    assert!(matches!(err, RemixError::StorageUpload(_)));
    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert_eq!(snapshot.displayed_ref.as_deref(), Some(shown.derived_ref.as_str()));
    assert!(!snapshot.is_processing);

    h.objects.fail_uploads.store(false, Ordering::SeqCst);
    h.records.fail_links.store(true, Ordering::SeqCst);
    let err = h.orchestrator.request_edit(remix(&asset, "add snow")).await.unwrap_err();
    let orphaned = match err {
        RemixError::LinkWrite { orphaned_ref, .. } => orphaned_ref,
        other => panic!("expected link failure, got {other:?}"),
    };
    assert!(orphaned.contains("/cache/edited/"));
    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert_eq!(snapshot.displayed_ref.as_deref(), Some(shown.derived_ref.as_str()));
    assert!(!snapshot.is_processing);
}

#[tokio::test]
async fn demo_assets_are_rejected_before_any_vendor_call() {
    let h = harness(None, None);

    let err = h
        .orchestrator
        .request_edit(RemixRequest {
            asset_id: "1".to_string(),
            prompt: "make it black and white".to_string(),
            parent_id: None,
            user_id: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RemixError::InvalidReference(_)));
    assert_eq!(h.editor.calls.load(Ordering::SeqCst), 0);

    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;
    let mut reply = remix(&asset, "reply to a demo comment");
    reply.parent_id = Some("4".to_string());
    let err = h.orchestrator.request_edit(reply).await.unwrap_err();
    assert!(matches!(err, RemixError::InvalidReference(_)));
    assert_eq!(h.editor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unsaved_prompts_stay_in_the_local_thread() {
    let h = harness(None, None);
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;
    h.records.fail_inserts.store(true, Ordering::SeqCst);

    let err = h.orchestrator.request_edit(remix(&asset, "make it pop")).await.unwrap_err();

    assert!(matches!(err, RemixError::RecordStore(_)));
    assert_eq!(h.editor.calls.load(Ordering::SeqCst), 0);
    let page = h.orchestrator.load_page(&asset.id.to_string()).await;
    assert_eq!(page.thread.len(), 1);
    let entry = &page.thread.entries()[0];
    assert_eq!(entry.prompt, "make it pop");
    assert!(entry.id.to_string().starts_with("local-"));
}

#[tokio::test]
async fn later_started_remix_keeps_the_display() {
    let gate = Arc::new(Notify::new());
    let h = harness(None, Some(gate.clone()));
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;

    let slow = h.orchestrator.spawn_edit(remix(&asset, "slow golden hour"));
    while h.editor.calls.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.orchestrator.display_snapshot(asset.id).is_processing);

    let fast = h.orchestrator.request_edit(remix(&asset, "fast neon")).await.unwrap();
    assert!(fast.displayed);
    assert!(h.orchestrator.display_snapshot(asset.id).is_processing);

    gate.notify_one();
    let slow = slow.await.unwrap().unwrap();
    assert!(!slow.displayed);

    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert!(!snapshot.is_processing);
    assert_eq!(snapshot.displayed_ref.as_deref(), Some(fast.derived_ref.as_str()));
    let stored = h.records.get_edit_request(slow.request_id).await.unwrap().unwrap();
    assert!(stored.is_resolved());
}

#[tokio::test]
async fn abandoned_remix_stops_reporting_processing() {
    let gate = Arc::new(Notify::new());
    let h = harness(None, Some(gate));
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;

    let waited = tokio::time::timeout(
        Duration::from_secs(1),
        h.orchestrator.request_edit(remix(&asset, "slow golden hour")),
    )
    .await;

    assert!(waited.is_err());
    assert_eq!(h.editor.calls.load(Ordering::SeqCst), 1);
    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert!(!snapshot.is_processing);
    assert_eq!(snapshot.processing_kind, None);
    assert_eq!(snapshot.displayed_ref, None);
}

#[tokio::test(start_paused = true)]
async fn video_results_are_recorded_as_video_whatever_their_bytes() {
    let response = json!({"videos": [{"bytesBase64Encoded": STANDARD.encode(png(10)), "mimeType": "image/png"}]});
    let h = harness_with(ScriptedJobs::with_response(Some(1), response), None);
    let asset = seed_asset(&h.records, "https://cdn.example.com/ads/nike.mp4").await;

    let outcome = h.orchestrator.request_edit(remix(&asset, "cyberpunk style")).await.unwrap();

    assert_eq!(outcome.kind, MediaKind::Video);
    assert_eq!(outcome.mime_type, "image/png");
    assert!(outcome.derived_ref.contains("/cache/edited-videos/"));
    let stored = h.records.get_edit_request(outcome.request_id).await.unwrap().unwrap();
    assert_eq!(stored.derived_kind, Some(MediaKind::Video));
    assert_eq!(stored.derived_ref.as_deref(), Some(outcome.derived_ref.as_str()));
}

#[tokio::test(start_paused = true)]
async fn bucket_only_video_results_are_unsupported() {
    let response = json!({"videos": [{"gcsUri": "gs://konten-renders/op-1/sample_0.mp4", "mimeType": "video/mp4"}]});
    let h = harness_with(ScriptedJobs::with_response(Some(2), response), None);
    let asset = seed_asset(&h.records, "https://cdn.example.com/ads/nike.mp4").await;

    let err = h.orchestrator.request_edit(remix(&asset, "cyberpunk style")).await.unwrap_err();

    assert!(matches!(err, RemixError::UnsupportedResultFormat(ref message) if message.contains("gs://konten-renders")));
    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert!(!snapshot.is_processing);
    assert_eq!(snapshot.displayed_ref, None);
    let requests = h.records.list_edit_requests(asset.id).await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].is_resolved());
}

#[tokio::test(start_paused = true)]
async fn https_video_results_are_downloaded_and_linked() {
    let response = json!({"videos": [{"gcsUri": "https://storage.example.com/renders/sample_0.mp4", "mimeType": "video/mp4"}]});
    let h = harness_with(ScriptedJobs::with_response(Some(2), response), None);
    let asset = seed_asset(&h.records, "https://cdn.example.com/ads/nike.mp4").await;

    let outcome = h.orchestrator.request_edit(remix(&asset, "cyberpunk style")).await.unwrap();

    assert_eq!(outcome.kind, MediaKind::Video);
    assert_eq!(outcome.mime_type, "video/mp4");
    assert!(outcome.derived_ref.contains("/cache/edited-videos/"));
    assert!(outcome.derived_ref.ends_with(".mp4"));
    let key = h.objects.key_for_url(&outcome.derived_ref).unwrap();
    assert!(h.objects.inner.exists(&key).await.unwrap());

    let stored = h.records.get_edit_request(outcome.request_id).await.unwrap().unwrap();
    assert_eq!(stored.derived_ref.as_deref(), Some(outcome.derived_ref.as_str()));
    let snapshot = h.orchestrator.display_snapshot(asset.id);
    assert_eq!(snapshot.displayed_ref.as_deref(), Some(outcome.derived_ref.as_str()));
}

#[tokio::test]
async fn rejected_image_edit_names_the_edit_not_a_job() {
    let h = harness(None, None);
    let asset = seed_asset(&h.records, "http://localhost:3000/cache/uploads/images/ad.jpg").await;
    h.editor.reject.store(true, Ordering::SeqCst);

    let err = h.orchestrator.request_edit(remix(&asset, "make it black and white")).await.unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, RemixError::JobSubmission(_)));
    assert!(message.contains("image edit rejected: quota exceeded"));
    assert!(!message.contains("job"));
    assert!(!h.orchestrator.display_snapshot(asset.id).is_processing);
}
