use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

use konten_remix::{
    config::RemixConfig,
    frame_sampler::{FfmpegDecoder, FrameSampler},
    gemini::{GeminiImageEditor, HttpMediaFetcher},
    mcp_server::RemixServer,
    orchestrator::RemixOrchestrator,
    store::{AssetPersistence, JsonRecordStore, LocalFileStorage, ObjectStore, RecordStore},
    thread::{LocalCache, SeedCatalog, ThreadMerger},
    veo::VeoClient,
    web_routes::{self, AppState},
};

const UPLOAD_LIMIT_BYTES: usize = 200 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("konten_remix=info")),
        )
        .init();

    let config = RemixConfig::from_env();
    let bind_address = config.bind_address();
    let mcp_path = config.secret_path("/mcp");
    let upload_path = config.secret_path("/upload");

    let storage = Arc::new(LocalFileStorage::new(
        config.cache_dir.clone(),
        config.cache_base_url.clone(),
    ));
    let objects: Arc<dyn ObjectStore> = storage.clone();
    let records: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(storage.clone()));

    let threads = ThreadMerger::new(
        SeedCatalog::builtin(),
        LocalCache::new(storage.clone()),
        records.clone(),
    );
    let mut orchestrator = RemixOrchestrator::new(
        FrameSampler::new(Arc::new(FfmpegDecoder::default()), std::env::temp_dir()),
        Arc::new(HttpMediaFetcher::new(config.public_dir.clone())),
        AssetPersistence::new(objects.clone(), records.clone()),
        records,
        threads,
    );
    match config.require_gemini_key() {
        Ok(key) => orchestrator = orchestrator.with_image_editor(Arc::new(GeminiImageEditor::new(key))),
        Err(err) => tracing::warn!(error = %err, "image remixing disabled"),
    }
    match config.require_gcp() {
        Ok((project, token)) => {
            orchestrator = orchestrator.with_video_jobs(Arc::new(VeoClient::new(
                project,
                config.gcp_location.clone(),
                token,
            )))
        }
        Err(err) => tracing::warn!(error = %err, "video remixing disabled"),
    }

    let orchestrator_for_service = orchestrator.clone();
    let objects_for_service = objects.clone();
    let service = StreamableHttpService::new(
        move || {
            Ok(RemixServer::new(
                orchestrator_for_service.clone(),
                objects_for_service.clone(),
            ))
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let state = AppState { storage, orchestrator };
    let router = axum::Router::new()
        .route(
            &upload_path,
            post(web_routes::handle_asset_upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/api/assets/{id}", get(web_routes::asset_page))
        .nest_service(&mcp_path, service)
        .nest_service("/cache", ServeDir::new(config.cache_dir.clone()))
        .fallback_service(ServeDir::new(config.public_dir.clone()))
        .with_state(state);
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;

    tracing::info!(address = %bind_address, mcp = %mcp_path, upload = %upload_path, "konten-remix server started");

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
