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
pub struct ShowOriginalRequest {
    #[schemars(description = "Advertisement id")]
    pub asset_id: String,
}

pub async fn show_original(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<ShowOriginalRequest>,
) -> Result<CallToolResult, McpError> {
    let asset_id = parse_durable_id(&request.asset_id, "asset_id")?;
    json_result(&orchestrator.show_original(asset_id))
}
