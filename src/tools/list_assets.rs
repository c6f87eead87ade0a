use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::Deserialize;

use crate::{orchestrator::RemixOrchestrator, thread::AssetView, tools::json_result};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListAssetsRequest {
    #[schemars(description = "Maximum number of advertisements to return, default 20")]
    pub limit: Option<u32>,
}

pub async fn list_assets(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<ListAssetsRequest>,
) -> Result<CallToolResult, McpError> {
    let limit = request.limit.unwrap_or(20).max(1) as usize;
    let records = orchestrator.records().list_assets().await.map_err(|err| {
        McpError::internal_error(
            "list advertisements failed",
            Some(serde_json::Value::String(err.to_string())),
        )
    })?;
    let assets: Vec<AssetView> = records.iter().take(limit).map(AssetView::from_record).collect();
    json_result(&assets)
}
