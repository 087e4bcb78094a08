//! Lazily populated cache of the model names a backend can load.
//!
//! The first model-bearing request asks `GET /object_info/<node_type>`
//! for the loader's enumerated model list. A successful answer is kept
//! for the lifetime of the cache; a failed one yields an empty set
//! ("unknown", not "no models") and is retried on the next call.

use std::collections::BTreeSet;
use std::sync::Arc;

use comfymcp_core::resolver::Resolver;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::backend::ComfyBackend;

/// Loader node queried by default.
pub const DEFAULT_MODEL_NODE: &str = "CheckpointLoaderSimple";

/// Shared, read-mostly set of known model names.
pub type ModelSet = Arc<BTreeSet<String>>;

/// Per-client model availability cache.
///
/// Safe for concurrent use. Concurrent first callers may each fetch;
/// the last write wins, which is harmless because the answer only
/// depends on backend state.
#[derive(Debug)]
pub struct ModelCache {
    node_type: String,
    models: RwLock<Option<ModelSet>>,
}

impl ModelCache {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            models: RwLock::new(None),
        }
    }

    /// Loader node type whose inputs are introspected.
    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// Known model names, fetching on first use.
    ///
    /// Never fails: an unreachable or malformed introspection endpoint
    /// yields an empty set, which callers must treat as unconstrained.
    pub async fn get_models<B>(&self, backend: &B) -> ModelSet
    where
        B: ComfyBackend + ?Sized,
    {
        if let Some(models) = self.models.read().await.as_ref() {
            return Arc::clone(models);
        }
        self.refresh(backend).await
    }

    /// Re-query the backend, replacing the cached set on success.
    pub async fn refresh<B>(&self, backend: &B) -> ModelSet
    where
        B: ComfyBackend + ?Sized,
    {
        match self.fetch(backend).await {
            Some(models) => {
                let models = Arc::new(models);
                *self.models.write().await = Some(Arc::clone(&models));
                models
            }
            None => Arc::new(BTreeSet::new()),
        }
    }

    /// Whether a successful fetch has been cached.
    pub async fn is_populated(&self) -> bool {
        self.models.read().await.is_some()
    }

    async fn fetch<B>(&self, backend: &B) -> Option<BTreeSet<String>>
    where
        B: ComfyBackend + ?Sized,
    {
        let info = match backend.object_info(&self.node_type).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(
                    node_type = %self.node_type,
                    error = %e,
                    "Failed to fetch model list; model overrides will not be validated",
                );
                return None;
            }
        };

        match parse_model_list(&info, &self.node_type) {
            Some(models) => {
                tracing::info!(count = models.len(), "Available models: {models:?}");
                Some(models)
            }
            None => {
                tracing::warn!(
                    node_type = %self.node_type,
                    "Unexpected object_info schema; model overrides will not be validated",
                );
                None
            }
        }
    }
}

/// Extract the enumerated model names from an `object_info` response.
///
/// Looks at `<node_type>.input.required.<slot>[0]` for the first model
/// slot name present. Both the classic `[[names...], {...}]` shape and the
/// newer `["COMBO", {"options": [names...]}]` shape are understood.
pub fn parse_model_list(info: &Value, node_type: &str) -> Option<BTreeSet<String>> {
    let required = info.get(node_type)?.get("input")?.get("required")?;

    let slot_info = Resolver::default()
        .candidates("model")
        .into_iter()
        .find_map(|slot| required.get(slot))?;

    let names = match slot_info.get(0)? {
        Value::Array(names) => names,
        Value::String(kind) if kind == "COMBO" => slot_info.get(1)?.get("options")?.as_array()?,
        _ => return None,
    };

    Some(
        names
            .iter()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect(),
    )
}
