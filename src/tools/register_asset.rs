use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::Deserialize;

use crate::{
    dispatch::MediaKind,
    orchestrator::RemixOrchestrator,
    store::NewAsset,
    thread::AssetView,
    tools::{json_result, validate_media_url},
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegisterAssetRequest {
    #[schemars(description = "Image or video URL of the advertisement")]
    pub media_url: String,
    #[schemars(description = "Brand that owns the advertisement")]
    pub brand: String,
    #[schemars(description = "Advertisement title, defaults to the brand")]
    pub title: Option<String>,
    #[schemars(description = "Where the advertisement runs")]
    pub location: Option<String>,
}

pub async fn register_asset(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<RegisterAssetRequest>,
) -> Result<CallToolResult, McpError> {
    let media_url = validate_media_url(&request.media_url)?;
    let brand = request.brand.trim();
    if brand.is_empty() {
        return Err(McpError::invalid_params("brand must not be empty", None));
    }
    let records = orchestrator.records();
    let internal = |err: anyhow::Error| {
        McpError::internal_error(
            "register advertisement failed",
            Some(serde_json::Value::String(err.to_string())),
        )
    };
    let company = records.get_or_create_company(brand).await.map_err(internal)?;
    let asset = records
        .insert_asset(NewAsset {
            company_id: company.id,
            title: request
                .title
                .map(|title| title.trim().to_string())
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| brand.to_string()),
            brand: brand.to_string(),
            primary_media_kind: MediaKind::from_reference(&media_url),
            primary_media_ref: media_url,
            location: request.location.unwrap_or_default().trim().to_string(),
            likes: 0,
        })
        .await
        .map_err(internal)?;
    json_result(&AssetView::from_record(&asset))
}
