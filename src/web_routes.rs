use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;

use crate::dispatch::MediaKind;
use crate::image_processing::{detect_mime_type, extension_for_mime_type, get_dimensions};
use crate::orchestrator::{DisplaySnapshot, RemixOrchestrator};
use crate::store::{LocalFileStorage, NewAsset, ObjectStore, content_digest};
use crate::thread::{AssetPage, RecordId};

/// Shared state of the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<LocalFileStorage>,
    pub orchestrator: RemixOrchestrator,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct UploadResponse {
    id: String,
    url: String,
    key: String,
    kind: MediaKind,
}

#[derive(Serialize)]
struct PageResponse {
    #[serde(flatten)]
    page: AssetPage,
    display: Option<DisplaySnapshot>,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

fn extension_from_filename(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let trimmed = ext.trim();
    if stem.is_empty() || trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

fn is_media_type(content_type: &str) -> bool {
    content_type.starts_with("image/") || content_type.starts_with("video/")
}

#[derive(Default)]
struct UploadForm {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Option<Vec<u8>>,
    brand: Option<String>,
    title: Option<String>,
    location: Option<String>,
}

async fn read_form(multipart: &mut Multipart) -> Result<UploadForm, Response> {
    let mut form = UploadForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(json_error(StatusCode::BAD_REQUEST, &format!("failed to read form: {err}")));
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.content_type = field.content_type().map(str::to_string);
            form.file_name = Some(field.file_name().unwrap_or_default().to_string());
            let data = field.bytes().await.map_err(|err| {
                json_error(StatusCode::BAD_REQUEST, &format!("failed to read file: {err}"))
            })?;
            form.bytes = Some(data.to_vec());
            continue;
        }
        let text = field.text().await.map_err(|err| {
            json_error(StatusCode::BAD_REQUEST, &format!("failed to read field {name}: {err}"))
        })?;
        let text = Some(text.trim().to_string()).filter(|text| !text.is_empty());
        match name.as_str() {
            "brand" => form.brand = text,
            "title" => form.title = text,
            "location" => form.location = text,
            _ => {}
        }
    }
    Ok(form)
}

/// Stores an uploaded advertisement and registers it under its brand.
pub async fn handle_asset_upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let form = match read_form(&mut multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let Some(bytes) = form.bytes.filter(|bytes| !bytes.is_empty()) else {
        return json_error(StatusCode::BAD_REQUEST, "no file uploaded");
    };
    let Some(brand) = form.brand else {
        return json_error(StatusCode::BAD_REQUEST, "brand is required");
    };
    let content_type = form
        .content_type
        .filter(|value| is_media_type(value))
        .or_else(|| detect_mime_type(&bytes).map(str::to_string));
    let Some(content_type) = content_type.filter(|value| is_media_type(value)) else {
        return json_error(StatusCode::BAD_REQUEST, "only image and video files are supported");
    };
    if content_type.starts_with("image/") {
        if let Err(err) = get_dimensions(&bytes, &content_type) {
            return json_error(StatusCode::BAD_REQUEST, &format!("unreadable image: {err}"));
        }
    }

    let ext = form
        .file_name
        .as_deref()
        .and_then(extension_from_filename)
        .unwrap_or_else(|| extension_for_mime_type(&content_type).to_string());
    let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = content_digest(format!("upload:{timestamp}:{}", bytes.len()).as_bytes());
    let dir = if content_type.starts_with("video/") { "videos" } else { "images" };
    let key = format!("uploads/{dir}/{}.{ext}", &digest[..32]);

    if let Err(err) = state.storage.upload(&key, &bytes, &content_type).await {
        tracing::error!(%key, error = %err, "failed to store upload");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, &format!("failed to store file: {err}"));
    }
    let url = state.storage.public_url(&key);
    let kind = if content_type.starts_with("video/") { MediaKind::Video } else { MediaKind::Image };

    let records = state.orchestrator.records();
    let company = match records.get_or_create_company(&brand).await {
        Ok(company) => company,
        Err(err) => {
            tracing::error!(%brand, error = %err, "failed to resolve company");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, &format!("failed to save company: {err}"));
        }
    };
    let asset = records
        .insert_asset(NewAsset {
            company_id: company.id,
            title: form.title.unwrap_or_else(|| brand.clone()),
            brand,
            primary_media_ref: url.clone(),
            primary_media_kind: kind,
            location: form.location.unwrap_or_default(),
            likes: 0,
        })
        .await;
    match asset {
        Ok(asset) => {
            tracing::info!(asset_id = %asset.id, %key, "advertisement uploaded");
            (
                StatusCode::OK,
                Json(UploadResponse { id: asset.id.to_string(), url, key, kind }),
            )
                .into_response()
        }
        Err(err) => {
            tracing::error!(%key, error = %err, "failed to save advertisement");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &format!("failed to save advertisement: {err}"))
        }
    }
}

/// Merged header, thread and display state of one advertisement.
pub async fn asset_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let page = state.orchestrator.load_page(&id).await;
    let display = RecordId::parse(&id)
        .as_durable()
        .map(|durable| state.orchestrator.display_snapshot(durable));
    Json(PageResponse { page, display }).into_response()
}
