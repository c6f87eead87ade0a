use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};

use crate::orchestrator::RemixOrchestrator;
use crate::store::ObjectStore;
use crate::tools::{
    DeleteAssetRequest, GetAssetRequest, ListAssetsRequest, RegisterAssetRequest,
    RemixAssetRequest, SelectRemixRequest, ShowOriginalRequest, ShowThreadRequest,
};

#[derive(Clone)]
pub struct RemixServer {
    tool_router: ToolRouter<Self>,
    orchestrator: RemixOrchestrator,
    objects: Arc<dyn ObjectStore>,
}

impl RemixServer {
    pub fn new(orchestrator: RemixOrchestrator, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            orchestrator,
            objects,
        }
    }
}

#[tool_router]
impl RemixServer {
    #[tool(
        description = "Remix an advertisement with a natural-language prompt. Images are edited directly; videos are regenerated from sampled frames and can take up to 10 minutes. Show the result with ![](url)"
    )]
    async fn remix_asset(
        &self,
        Parameters(request): Parameters<RemixAssetRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::remix_asset(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Show an advertisement with its threaded remix prompts and their results")]
    async fn show_thread(
        &self,
        Parameters(request): Parameters<ShowThreadRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::show_thread(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Get an advertisement and the media currently displayed for it")]
    async fn get_asset(
        &self,
        Parameters(request): Parameters<GetAssetRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::get_asset(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "List uploaded advertisements, newest first")]
    async fn list_assets(
        &self,
        Parameters(request): Parameters<ListAssetsRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::list_assets(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Register an advertisement from an image or video URL")]
    async fn register_asset(
        &self,
        Parameters(request): Parameters<RegisterAssetRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::register_asset(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Display the original media of an advertisement again")]
    async fn show_original(
        &self,
        Parameters(request): Parameters<ShowOriginalRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::show_original(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Display the media produced by an earlier remix prompt")]
    async fn select_remix(
        &self,
        Parameters(request): Parameters<SelectRemixRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::select_remix(&self.orchestrator, Parameters(request)).await
    }

    #[tool(description = "Delete an advertisement, its remix prompts and their stored media")]
    async fn delete_asset(
        &self,
        Parameters(request): Parameters<DeleteAssetRequest>,
    ) -> Result<CallToolResult, McpError> {
        crate::tools::delete_asset(&self.orchestrator, &self.objects, Parameters(request)).await
    }
}

#[tool_handler]
impl ServerHandler for RemixServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(
                "Remix advertisements: list or register an ad, submit remix prompts, and browse the remix thread."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}
