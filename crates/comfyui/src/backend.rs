//! Backend seam used by the job runner and the model cache.
//!
//! [`ComfyUIApi`] is the production implementation. Tests substitute
//! scripted backends so the poll loop can run without a live server.

use serde_json::Value;

use crate::api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
use crate::history::History;

/// The subset of the ComfyUI HTTP surface this crate consumes.
#[async_trait::async_trait]
pub trait ComfyBackend: Send + Sync {
    /// Base HTTP URL, used to build artifact URLs.
    fn base_url(&self) -> &str;

    /// `POST /prompt`.
    async fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// `GET /history/{prompt_id}`.
    async fn history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError>;

    /// `GET /object_info/{node_type}`.
    async fn object_info(&self, node_type: &str) -> Result<Value, ComfyUIApiError>;
}

#[async_trait::async_trait]
impl ComfyBackend for ComfyUIApi {
    fn base_url(&self) -> &str {
        self.api_url()
    }

    async fn submit(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id).await
    }

    async fn history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn object_info(&self, node_type: &str) -> Result<Value, ComfyUIApiError> {
        self.get_object_info(node_type).await
    }
}
