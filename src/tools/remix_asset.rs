use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::{Deserialize, Serialize};

use crate::{
    orchestrator::{RemixOrchestrator, RemixRequest},
    tools::{ToolResponse, json_result},
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RemixAssetRequest {
    #[schemars(description = "Id of the advertisement to remix")]
    pub asset_id: String,
    #[schemars(description = "Natural-language edit instruction")]
    pub prompt: String,
    #[schemars(description = "Id of the earlier remix prompt this one replies to")]
    pub parent_id: Option<String>,
    #[schemars(description = "Author of the prompt")]
    pub user_id: Option<String>,
    #[schemars(description = "Wait for the result (default true). Video remixes can take up to 10 minutes")]
    pub wait: Option<bool>,
}

#[derive(Serialize)]
struct Accepted {
    asset_id: String,
    status: &'static str,
    text: String,
}

pub async fn remix_asset(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<RemixAssetRequest>,
) -> Result<CallToolResult, McpError> {
    let remix = RemixRequest {
        asset_id: request.asset_id.clone(),
        prompt: request.prompt,
        parent_id: request.parent_id,
        user_id: request.user_id,
    };

    if !request.wait.unwrap_or(true) {
        let handle = orchestrator.spawn_edit(remix);
        let asset_id = request.asset_id.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(outcome)) => {
                    tracing::info!(request_id = %outcome.request_id, derived_ref = %outcome.derived_ref, "background remix finished");
                }
                Ok(Err(err)) => tracing::warn!(%asset_id, error = %err, "background remix failed"),
                Err(err) => tracing::error!(%asset_id, error = %err, "background remix task panicked"),
            }
        });
        return json_result(&Accepted {
            asset_id: request.asset_id,
            status: "processing",
            text: "Remix started. Check get_asset for the displayed result.".to_string(),
        });
    }

    let outcome = orchestrator.request_edit(remix).await?;
    let text = match &outcome.analysis {
        Some(analysis) => format!("The model returned no new image; the source is kept. Analysis: {analysis}"),
        None => format!("Remix {} is ready.", outcome.request_id),
    };
    json_result(&ToolResponse {
        url: outcome.derived_ref.clone(),
        name: format!("remixed-{}", outcome.kind.as_str()),
        mime_type: outcome.mime_type.clone(),
        text,
    })
}
