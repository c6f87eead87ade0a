use std::path::PathBuf;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::image_processing::detect_mime_type;
use crate::resolver::{self, Resolved, decode_base64};

const GEMINI_API_ROOT: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// What an image model produced for an edit prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageEdit {
    Edited { bytes: Vec<u8>, mime_type: String },
    /// The model answered with text only; the source image stays the result.
    AnalysisOnly { text: String },
}

#[async_trait]
pub trait ImageEditor: Send + Sync {
    async fn edit(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<ImageEdit>;
}

/// Loads the bytes behind a media reference.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: String },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    candidate_count: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(anyhow!("Gemini request failed: {status} {text}"))
}

/// Reads a `generateContent` response.
///
/// Any inline image part wins over text. A response without one falls back
/// to the generic resolver so unexpected layouts still yield media.
pub fn interpret_generate_content(payload: &Value) -> Result<ImageEdit> {
    let parsed: GenerateContentResponse = serde_json::from_value(payload.clone()).unwrap_or_default();
    if let Some(message) = parsed.error.and_then(|err| err.message) {
        return Err(anyhow!("Gemini returned an error: {message}"));
    }

    let parts: Vec<ResponsePart> = parsed
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .collect();

    for part in &parts {
        let Some(inline) = &part.inline_data else {
            continue;
        };
        let Some(bytes) = decode_base64(&inline.data) else {
            tracing::warn!("Gemini inline part is not base64, skipping");
            continue;
        };
        let mime_type = inline
            .mime_type
            .clone()
            .unwrap_or_else(|| detect_mime_type(&bytes).unwrap_or("image/png").to_string());
        return Ok(ImageEdit::Edited { bytes, mime_type });
    }

    let text: Vec<&str> = parts.iter().filter_map(|part| part.text.as_deref()).collect();
    if !text.is_empty() {
        return Ok(ImageEdit::AnalysisOnly { text: text.join("\n").trim().to_string() });
    }

    match resolver::resolve(payload, "image/png")? {
        Resolved::Inline { bytes, mime_type, .. } => Ok(ImageEdit::Edited { bytes, mime_type }),
        Resolved::StorageRef { uri, .. } => Err(anyhow!("Gemini returned a storage reference: {uri}")),
    }
}

pub struct GeminiImageEditor {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiImageEditor {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: GEMINI_IMAGE_MODEL.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{GEMINI_API_ROOT}/models/{}:generateContent", self.model)
    }
}

/// The user's prompt goes to the model verbatim, followed by the source image.
fn edit_request<'a>(image: &[u8], mime_type: &'a str, prompt: &str) -> GenerateContentRequest<'a> {
    GenerateContentRequest {
        contents: vec![RequestContent {
            role: "user",
            parts: vec![
                RequestPart::Text { text: prompt.to_string() },
                RequestPart::Inline {
                    inline_data: InlineData { mime_type, data: STANDARD.encode(image) },
                },
            ],
        }],
        generation_config: GenerationConfig {
            temperature: 0.7,
            candidate_count: 1,
            max_output_tokens: 2048,
        },
    }
}

#[async_trait]
impl ImageEditor for GeminiImageEditor {
    async fn edit(&self, image: &[u8], mime_type: &str, prompt: &str) -> Result<ImageEdit> {
        let body = edit_request(image, mime_type, prompt);

        tracing::debug!(model = %self.model, image_bytes = image.len(), "sending image edit request");
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let payload: Value = response.json().await?;
        interpret_generate_content(&payload)
    }
}

/// Fetches `data:` URIs, `http(s)` URLs, and paths under the public asset directory.
pub struct HttpMediaFetcher {
    client: Client,
    public_dir: PathBuf,
}

impl HttpMediaFetcher {
    pub fn new(public_dir: PathBuf) -> Self {
        Self { client: Client::new(), public_dir }
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        let reference = reference.trim();
        if let Some(rest) = reference.strip_prefix("data:") {
            let (_, data) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("malformed data URI"))?;
            return decode_base64(data).ok_or_else(|| anyhow!("data URI is not base64"));
        }
        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self.client.get(reference).send().await?;
            if !response.status().is_success() {
                return Err(anyhow!("fetch failed: {} {}", response.status(), reference));
            }
            return Ok(response.bytes().await?.to_vec());
        }
        let relative = reference.trim_start_matches('/');
        if relative.split('/').any(|segment| segment == "..") {
            return Err(anyhow!("refusing to read outside the public directory: {reference}"));
        }
        Ok(tokio::fs::read(self.public_dir.join(relative)).await?)
    }
}
