//! Transport-independent tool dispatch.
//!
//! Every transport hands the dispatcher one decoded JSON envelope and
//! sends back whatever it returns. Failures never escape as Rust errors:
//! they are rendered into `{"error": ...}` payloads here.

use std::sync::Arc;

use comfymcp_comfyui::api::ComfyUIApi;
use comfymcp_comfyui::backend::ComfyBackend;
use comfymcp_comfyui::client::ComfyUIClient;
use comfymcp_core::template::{FsTemplateStore, TemplateStore};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::protocol::{wrap_response, ToolCall, ToolRequest, ToolResponse};

/// Routes tool calls to the generation client and the template store.
pub struct Dispatcher {
    client: ComfyUIClient<dyn ComfyBackend>,
    templates: Arc<dyn TemplateStore>,
}

impl Dispatcher {
    pub fn new(
        client: ComfyUIClient<dyn ComfyBackend>,
        templates: Arc<dyn TemplateStore>,
    ) -> Self {
        Self { client, templates }
    }

    /// Dispatcher talking to the ComfyUI instance and template directory
    /// named in `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let backend: Arc<dyn ComfyBackend> =
            Arc::new(ComfyUIApi::new(config.comfyui_url.as_str()));
        let client = ComfyUIClient::new(
            backend,
            config.poll_config(),
            config.model_loader_node.as_str(),
        );
        let templates: Arc<dyn TemplateStore> =
            Arc::new(FsTemplateStore::new(&config.template_dir));
        Self::new(client, templates)
    }

    pub fn client(&self) -> &ComfyUIClient<dyn ComfyBackend> {
        &self.client
    }

    /// Handle one envelope with no cancellation.
    pub async fn dispatch(&self, envelope: &Value) -> Value {
        self.dispatch_with_cancel(envelope, &CancellationToken::new()).await
    }

    /// Handle one envelope; `cancel` aborts an in-flight poll loop.
    pub async fn dispatch_with_cancel(
        &self,
        envelope: &Value,
        cancel: &CancellationToken,
    ) -> Value {
        let id = envelope.get("id").cloned();
        let response = match ToolCall::from_value(envelope) {
            Ok(call) => self.handle(&call, cancel).await,
            Err(e) => failure(e),
        };
        wrap_response(id, response.into_value())
    }

    /// Handle one raw JSON document.
    pub async fn dispatch_str(&self, text: &str, cancel: &CancellationToken) -> Value {
        match serde_json::from_str::<Value>(text) {
            Ok(envelope) => self.dispatch_with_cancel(&envelope, cancel).await,
            Err(e) => failure(DispatchError::MalformedPayload(e.to_string())).into_value(),
        }
    }

    /// Handle one raw text frame and return the serialized response.
    pub async fn dispatch_text(&self, text: &str, cancel: &CancellationToken) -> String {
        self.dispatch_str(text, cancel).await.to_string()
    }

    async fn handle(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResponse {
        let request = match ToolRequest::decode(call) {
            Ok(request) => request,
            Err(e) => return failure(e),
        };
        let tool = request.tool_name();
        tracing::debug!(tool, "Dispatching tool call");
        self.call(request, cancel).await.unwrap_or_else(failure)
    }

    /// Execute a decoded request.
    pub async fn call(
        &self,
        request: ToolRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult<ToolResponse> {
        match request {
            ToolRequest::GenerateImage(params) => {
                let graph = self.templates.load(&params.template_id).await?;
                let artifact = self.client.generate(&params, graph, cancel).await?;
                tracing::info!(
                    template_id = %params.template_id,
                    node_id = %artifact.node_id,
                    image_url = %artifact.url,
                    "Image generated",
                );
                Ok(ToolResponse::Image {
                    image_url: artifact.url,
                })
            }
            ToolRequest::ListTemplates => {
                let ids = self.templates.list_available().await?;
                Ok(ToolResponse::Templates(ids))
            }
        }
    }
}

pub(crate) fn failure(error: DispatchError) -> ToolResponse {
    tracing::warn!(kind = error.kind(), error = %error, "Tool call rejected");
    ToolResponse::from(error)
}
