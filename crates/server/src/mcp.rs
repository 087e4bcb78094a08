//! Model Context Protocol transport.
//!
//! Serves the same two tools as the envelope transports, plus the
//! `workflows://available` resource, over JSON-RPC using `rmcp`. Every
//! tool call goes through [`Dispatcher::call`]; dispatch failures come back
//! as tool results flagged `isError` rather than JSON-RPC errors.

use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    AnnotateAble, CallToolResult, Content, Implementation, ListResourcesResult,
    PaginatedRequestParams, RawResource, ReadResourceRequestParams, ReadResourceResult,
    ResourceContents, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{tool, tool_handler, tool_router, ErrorData, RoleServer, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{failure, Dispatcher};
use crate::error::DispatchError;
use crate::protocol::{ToolCall, ToolRequest, ToolResponse, GENERATE_IMAGE};

/// URI of the resource listing template IDs.
pub const WORKFLOWS_RESOURCE_URI: &str = "workflows://available";

const SERVER_NAME: &str = "ComfyUI_MCP_Server";

/// Arguments of the `generate_image` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerateImageArgs {
    /// Text prompt injected into the template's prompt slot.
    pub prompt: String,
    /// Template to run. Defaults to `basic_api_test`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Image width in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Image height in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Checkpoint file name; must be installed on the ComfyUI instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerateImageArgs {
    /// Decode through the envelope params rules so both transports
    /// validate identically.
    fn into_request(self) -> Result<ToolRequest, DispatchError> {
        let params = serde_json::to_value(self)
            .map_err(|e| DispatchError::MalformedPayload(e.to_string()))?;
        ToolRequest::decode(&ToolCall {
            tool: GENERATE_IMAGE.to_string(),
            params,
            id: None,
        })
    }
}

/// `rmcp` server handler backed by a shared [`Dispatcher`].
#[derive(Clone)]
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl McpServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            tool_router: Self::tool_router(),
        }
    }

    /// Serve one MCP session over a byte stream pair until the peer
    /// disconnects or `shutdown` fires.
    pub async fn serve_io<R, W>(
        self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> Result<(), rmcp::RmcpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let service = self.serve_with_ct((reader, writer), shutdown).await?;
        let reason = service.waiting().await?;
        tracing::info!(?reason, "MCP session ended");
        Ok(())
    }

    /// Serve on the process's stdin/stdout.
    pub async fn serve_stdio(self, shutdown: CancellationToken) -> Result<(), rmcp::RmcpError> {
        self.serve_io(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    #[tool(description = "Generate an image using ComfyUI")]
    async fn generate_image(
        &self,
        params: Parameters<GenerateImageArgs>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        tracing::info!(
            prompt = %params.0.prompt,
            workflow_id = ?params.0.workflow_id,
            width = ?params.0.width,
            height = ?params.0.height,
            model = ?params.0.model,
            "Received generate_image call",
        );
        let response = match params.0.into_request() {
            Ok(request) => self.run(request, &context.ct).await,
            Err(e) => failure(e),
        };
        Ok(tool_result(response))
    }

    #[tool(description = "List available workflow template IDs")]
    async fn list_templates(
        &self,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let response = self.run(ToolRequest::ListTemplates, &context.ct).await;
        Ok(tool_result(response))
    }

    async fn run(&self, request: ToolRequest, cancel: &CancellationToken) -> ToolResponse {
        self.dispatcher
            .call(request, cancel)
            .await
            .unwrap_or_else(failure)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Call generate_image with a prompt to render an image through ComfyUI. \
                 Use list_templates or the workflows://available resource to pick a workflow_id."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, ErrorData>> + Send + '_ {
        let resource = RawResource {
            uri: WORKFLOWS_RESOURCE_URI.to_string(),
            name: "available_workflows".to_string(),
            title: Some("Available workflows".to_string()),
            description: Some("List available workflows in ComfyUI".to_string()),
            mime_type: Some("application/json".to_string()),
            size: None,
            icons: None,
            meta: None,
        }
        .no_annotation();
        std::future::ready(Ok(ListResourcesResult::with_all_items(vec![resource])))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, ErrorData>> + Send + '_ {
        async move {
            if request.uri != WORKFLOWS_RESOURCE_URI {
                return Err(ErrorData::resource_not_found(
                    format!("resource '{}' was not found", request.uri),
                    Some(json!({ "uri": request.uri })),
                ));
            }
            let ids = match self.run(ToolRequest::ListTemplates, &context.ct).await {
                ToolResponse::Templates(ids) => ids,
                ToolResponse::Error { error } => {
                    return Err(ErrorData::internal_error(error, None));
                }
                other => {
                    return Err(ErrorData::internal_error(
                        format!("unexpected response: {}", other.into_value()),
                        None,
                    ));
                }
            };
            tracing::info!(?ids, "Available workflow ids");
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::TextResourceContents {
                    uri: request.uri,
                    mime_type: Some("application/json".to_string()),
                    text: json!(ids).to_string(),
                    meta: None,
                }],
            })
        }
    }
}

/// Render a dispatch response as tool output: the JSON payload as text,
/// flagged as an error for `{"error": ...}` payloads.
fn tool_result(response: ToolResponse) -> CallToolResult {
    let is_error = response.is_error();
    let content = vec![Content::text(response.into_value().to_string())];
    if is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}
