use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::{Deserialize, Serialize};

use crate::{
    orchestrator::{DisplaySnapshot, RemixOrchestrator},
    thread::{AssetView, RecordId},
    tools::json_result,
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetAssetRequest {
    #[schemars(description = "Advertisement id (durable uuid or demo number)")]
    pub asset_id: String,
}

#[derive(Serialize)]
struct AssetState {
    asset: AssetView,
    /// Media currently on screen, the original when nothing else is selected.
    current_media_ref: String,
    display: DisplaySnapshot,
}

pub async fn get_asset(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<GetAssetRequest>,
) -> Result<CallToolResult, McpError> {
    let id = RecordId::parse(&request.asset_id);
    let asset = orchestrator
        .threads()
        .resolve_asset(&id)
        .await
        .ok_or_else(|| {
            McpError::invalid_params(
                "advertisement not found",
                Some(serde_json::Value::String(request.asset_id.clone())),
            )
        })?;
    let display = id
        .as_durable()
        .map(|durable| orchestrator.display_snapshot(durable))
        .unwrap_or_else(|| DisplaySnapshot { showing_original: true, ..Default::default() });
    let current_media_ref = display
        .displayed_ref
        .clone()
        .unwrap_or_else(|| asset.media_ref.clone());
    json_result(&AssetState { asset, current_media_ref, display })
}
