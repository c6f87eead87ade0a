use std::sync::Arc;

use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::{Deserialize, Serialize};

use crate::{
    orchestrator::RemixOrchestrator,
    store::{ObjectStore, delete_asset_with_media},
    tools::{json_result, parse_durable_id},
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteAssetRequest {
    #[schemars(description = "Id of the advertisement to delete together with its remixes")]
    pub asset_id: String,
}

#[derive(Serialize)]
struct Deleted {
    asset_id: String,
    title: String,
}

pub async fn delete_asset(
    orchestrator: &RemixOrchestrator,
    objects: &Arc<dyn ObjectStore>,
    Parameters(request): Parameters<DeleteAssetRequest>,
) -> Result<CallToolResult, McpError> {
    let asset_id = parse_durable_id(&request.asset_id, "asset_id")?;
    let deleted = delete_asset_with_media(orchestrator.records().as_ref(), objects.as_ref(), asset_id)
        .await
        .map_err(|err| {
            McpError::internal_error(
                "delete advertisement failed",
                Some(serde_json::Value::String(err.to_string())),
            )
        })?
        .ok_or_else(|| {
            McpError::invalid_params(
                "advertisement not found",
                Some(serde_json::Value::String(request.asset_id.clone())),
            )
        })?;
    orchestrator.forget_asset(asset_id);
    json_result(&Deleted { asset_id: deleted.id.to_string(), title: deleted.title })
}
