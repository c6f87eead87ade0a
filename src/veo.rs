use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::frame_sampler::SampledFrame;
use crate::job_poller::{LongRunningJobApi, PollResponse};

const VEO_MODEL: &str = "veo-3.1-generate-preview";
const VIDEO_DURATION_SECONDS: u32 = 4;
const VIDEO_RESOLUTION: &str = "720p";

/// Wraps a user's remix prompt in the advertisement brief sent to the video model.
pub fn build_video_prompt(prompt: &str, brand: Option<&str>) -> String {
    let prompt = prompt.trim();
    match brand.map(str::trim).filter(|brand| !brand.is_empty()) {
        Some(brand) => format!(
            "Create a {VIDEO_DURATION_SECONDS}-second advertisement video for the brand {brand}. \
Include the details and instructions from the following prompt by a user who wants to \
edit or recreate the ad: {prompt}"
        ),
        None => format!("{prompt}. Create a {VIDEO_DURATION_SECONDS}-second advertisement video."),
    }
}

/// `predictLongRunning` body: first and last sampled frames anchor the clip.
pub fn build_generation_payload(prompt: &str, frames: &[SampledFrame]) -> Value {
    let mut instance = json!({ "prompt": prompt });
    if let Some(first) = frames.first() {
        instance["image"] = frame_json(first);
    }
    if frames.len() > 1 {
        if let Some(last) = frames.last() {
            instance["lastFrame"] = frame_json(last);
        }
    }
    json!({
        "instances": [instance],
        "parameters": {
            "sampleCount": 1,
            "durationSeconds": VIDEO_DURATION_SECONDS,
            "generateAudio": false,
            "resolution": VIDEO_RESOLUTION,
        }
    })
}

fn frame_json(frame: &SampledFrame) -> Value {
    json!({ "bytesBase64Encoded": frame.to_base64(), "mimeType": "image/jpeg" })
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchOperationRequest<'a> {
    operation_name: &'a str,
}

/// Vertex AI client for the Veo video model.
pub struct VeoClient {
    client: Client,
    project_id: String,
    location: String,
    access_token: String,
}

impl VeoClient {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            project_id: project_id.into(),
            location: location.into(),
            access_token: access_token.into(),
        }
    }

    fn model_url(&self, method: &str) -> String {
        format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{VEO_MODEL}:{method}",
            location = self.location,
            project = self.project_id,
        )
    }

    async fn post(&self, url: String, body: &(impl Serialize + Sync)) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Veo request failed: {status} {text}"));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl LongRunningJobApi for VeoClient {
    async fn submit(&self, payload: &Value) -> Result<String> {
        let body = self.post(self.model_url("predictLongRunning"), payload).await?;
        let operation: OperationResponse = serde_json::from_value(body)?;
        operation
            .name
            .ok_or_else(|| anyhow!("Veo did not return an operation name"))
    }

    async fn poll(&self, handle: &str) -> Result<PollResponse> {
        let body = self
            .post(
                self.model_url("fetchPredictOperation"),
                &FetchOperationRequest { operation_name: handle },
            )
            .await?;
        parse_operation(body)
    }
}

fn parse_operation(body: Value) -> Result<PollResponse> {
    let operation: OperationResponse = serde_json::from_value(body.clone())?;
    let error = operation.error.map(|err| match (err.code, err.message) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (None, Some(message)) => message,
        (Some(code), None) => format!("error code {code}"),
        (None, None) => "unknown error".to_string(),
    });
    Ok(PollResponse { done: operation.done, error, payload: body })
}
