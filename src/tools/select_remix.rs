use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::Deserialize;

use crate::{
    orchestrator::RemixOrchestrator,
    tools::{json_result, parse_durable_id},
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectRemixRequest {
    #[schemars(description = "Advertisement id")]
    pub asset_id: String,
    #[schemars(description = "Id of a finished remix prompt whose media should be displayed")]
    pub request_id: String,
}

pub async fn select_remix(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<SelectRemixRequest>,
) -> Result<CallToolResult, McpError> {
    let asset_id = parse_durable_id(&request.asset_id, "asset_id")?;
    let request_id = parse_durable_id(&request.request_id, "request_id")?;
    let snapshot = orchestrator.select_request(asset_id, request_id).await?;
    json_result(&snapshot)
}
