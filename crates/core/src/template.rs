//! Workflow template storage.
//!
//! Templates are pre-authored API-format workflow documents, one JSON
//! file per template ID (`<dir>/<id>.json`). Every [`TemplateStore::load`]
//! returns a freshly parsed [`Graph`], so mutations never reach storage
//! and never leak between requests.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::graph::Graph;

/// File extension of template documents.
const TEMPLATE_EXTENSION: &str = "json";

/// Read access to named workflow templates.
#[async_trait::async_trait]
pub trait TemplateStore: Send + Sync {
    /// Load a fresh copy of the template graph.
    async fn load(&self, template_id: &str) -> Result<Graph, CoreError>;

    /// IDs of all known templates, sorted ascending.
    async fn list_available(&self) -> Result<Vec<String>, CoreError>;
}

/// Filesystem-backed template store rooted at a single directory.
#[derive(Debug, Clone)]
pub struct FsTemplateStore {
    dir: PathBuf,
}

impl FsTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map a template ID to its document path.
    ///
    /// Returns `None` for IDs that could escape the storage directory.
    fn path_for(&self, template_id: &str) -> Option<PathBuf> {
        if !is_valid_template_id(template_id) {
            return None;
        }
        Some(self.dir.join(format!("{template_id}.{TEMPLATE_EXTENSION}")))
    }
}

#[async_trait::async_trait]
impl TemplateStore for FsTemplateStore {
    async fn load(&self, template_id: &str) -> Result<Graph, CoreError> {
        let path = self
            .path_for(template_id)
            .ok_or_else(|| CoreError::TemplateNotFound(template_id.to_string()))?;

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::TemplateNotFound(template_id.to_string()));
            }
            Err(e) => return Err(CoreError::Io(e)),
        };

        let graph = Graph::from_json(&text).map_err(|e| CoreError::InvalidTemplate {
            id: template_id.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            template_id,
            nodes = graph.len(),
            path = %path.display(),
            "Loaded workflow template",
        );
        Ok(graph)
    }

    async fn list_available(&self) -> Result<Vec<String>, CoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(dir = %self.dir.display(), "Template directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CoreError::Io(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// A template ID is a bare file stem: non-empty, no separators, no `..`.
pub fn is_valid_template_id(template_id: &str) -> bool {
    !template_id.is_empty()
        && !template_id.contains(['/', '\\'])
        && !template_id.contains("..")
        && !template_id.starts_with('.')
}
