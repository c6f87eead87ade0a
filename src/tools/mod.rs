pub mod delete_asset;
pub mod get_asset;
pub mod list_assets;
pub mod register_asset;
pub mod remix_asset;
pub mod select_remix;
pub mod show_original;
pub mod show_thread;
pub mod url_validation;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::thread::RecordId;

#[derive(Serialize)]
pub struct ToolResponse {
    pub url: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub text: String,
}

pub(crate) fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string(value).map_err(|err| {
        McpError::internal_error(
            "serialize tool response failed",
            Some(Value::String(err.to_string())),
        )
    })?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Accepts only ids backed by a durable record.
pub(crate) fn parse_durable_id(raw: &str, what: &str) -> Result<Uuid, McpError> {
    RecordId::parse(raw).as_durable().ok_or_else(|| {
        McpError::invalid_params(
            format!("{what} must be a durable id"),
            Some(Value::String(raw.to_string())),
        )
    })
}

pub use delete_asset::{delete_asset, DeleteAssetRequest};
pub use get_asset::{get_asset, GetAssetRequest};
pub use list_assets::{list_assets, ListAssetsRequest};
pub use register_asset::{register_asset, RegisterAssetRequest};
pub use remix_asset::{remix_asset, RemixAssetRequest};
pub use select_remix::{select_remix, SelectRemixRequest};
pub use show_original::{show_original, ShowOriginalRequest};
pub use show_thread::{show_thread, ShowThreadRequest};
pub use url_validation::validate_media_url;
