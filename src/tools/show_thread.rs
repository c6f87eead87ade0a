use rmcp::{
    ErrorData as McpError,
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::JsonSchema,
};
use serde::{Deserialize, Serialize};

use crate::{
    dispatch::MediaKind,
    orchestrator::RemixOrchestrator,
    thread::{AssetView, EntrySource},
    tools::json_result,
};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShowThreadRequest {
    #[schemars(description = "Advertisement id (durable uuid or demo number)")]
    pub asset_id: String,
}

#[derive(Serialize)]
struct ThreadLine {
    id: String,
    parent_id: Option<String>,
    level: String,
    author: String,
    prompt: String,
    likes: u32,
    verified: bool,
    derived_ref: Option<String>,
    derived_kind: Option<MediaKind>,
    source: EntrySource,
}

#[derive(Serialize)]
struct ThreadView {
    asset: AssetView,
    entries: Vec<ThreadLine>,
}

pub async fn show_thread(
    orchestrator: &RemixOrchestrator,
    Parameters(request): Parameters<ShowThreadRequest>,
) -> Result<CallToolResult, McpError> {
    let page = orchestrator.load_page(&request.asset_id).await;
    let entries = page
        .thread
        .entries()
        .iter()
        .map(|entry| ThreadLine {
            id: entry.id.to_string(),
            parent_id: entry.parent_id.as_ref().map(ToString::to_string),
            level: page.thread.level_label(&entry.id),
            author: entry.author.clone(),
            prompt: entry.prompt.clone(),
            likes: entry.likes,
            verified: entry.verified,
            derived_ref: entry.derived_ref.clone(),
            derived_kind: entry.derived_kind,
            source: entry.source,
        })
        .collect();
    json_result(&ThreadView { asset: page.asset, entries })
}
