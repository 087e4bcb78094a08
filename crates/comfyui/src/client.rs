//! High-level image generation client.
//!
//! [`ComfyUIClient`] ties one backend to its model cache, the parameter
//! resolver and the job runner. It is constructed explicitly and shared
//! by reference; nothing here is process-global.

use std::sync::Arc;

use comfymcp_core::graph::Graph;
use comfymcp_core::params::ParameterSet;
use comfymcp_core::resolver::Resolver;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::backend::ComfyBackend;
use crate::models::{ModelCache, ModelSet, DEFAULT_MODEL_NODE};
use crate::runner::{JobError, JobRunner, OutputArtifact, PollConfig};

/// Generation client for a single ComfyUI instance.
pub struct ComfyUIClient<B: ComfyBackend + ?Sized = ComfyUIApi> {
    backend: Arc<B>,
    models: ModelCache,
    resolver: Resolver,
    runner: JobRunner<B>,
}

impl ComfyUIClient<ComfyUIApi> {
    /// Client for the ComfyUI server at `api_url` with default polling.
    pub fn from_url(api_url: impl Into<String>) -> Self {
        Self::new(
            Arc::new(ComfyUIApi::new(api_url)),
            PollConfig::default(),
            DEFAULT_MODEL_NODE,
        )
    }
}

impl<B: ComfyBackend + ?Sized> ComfyUIClient<B> {
    /// * `backend`    - HTTP surface of the ComfyUI instance.
    /// * `poll`       - backoff schedule for the history poll loop.
    /// * `model_node` - loader node type introspected for model names.
    pub fn new(backend: Arc<B>, poll: PollConfig, model_node: impl Into<String>) -> Self {
        Self {
            runner: JobRunner::new(Arc::clone(&backend), poll),
            models: ModelCache::new(model_node),
            resolver: Resolver::default(),
            backend,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn runner(&self) -> &JobRunner<B> {
        &self.runner
    }

    /// Known model names (cached after the first successful fetch).
    pub async fn available_models(&self) -> ModelSet {
        self.models.get_models(self.backend.as_ref()).await
    }

    /// Force a fresh model list query.
    pub async fn refresh_models(&self) -> ModelSet {
        self.models.refresh(self.backend.as_ref()).await
    }

    /// Overlay `params` onto `graph` in place.
    ///
    /// The model cache is only consulted when the request overrides the
    /// model.
    pub async fn prepare(&self, params: &ParameterSet, graph: &mut Graph) -> Result<(), JobError> {
        let known = if params.has_model() {
            self.available_models().await
        } else {
            ModelSet::default()
        };
        params.apply(&self.resolver, graph, &known)?;
        Ok(())
    }

    /// Prepare `graph`, run it, and return the produced artifact.
    pub async fn generate(
        &self,
        params: &ParameterSet,
        mut graph: Graph,
        cancel: &CancellationToken,
    ) -> Result<OutputArtifact, JobError> {
        self.prepare(params, &mut graph).await?;
        tracing::info!(template_id = %params.template_id, "Submitting workflow to ComfyUI");
        self.runner.run_cancellable(&graph, cancel).await
    }
}
