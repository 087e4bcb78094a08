//! Typed view of `GET /history/{prompt_id}` responses.
//!
//! The response maps prompt IDs to records. A record appears only once
//! the prompt has finished. Its `outputs` map node IDs to whatever that
//! node emitted, which differs per node type, so outputs stay as raw JSON
//! and are searched for an `images` list. Map order follows the backend's
//! response order.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

/// Prompt ID → history record.
pub type History = IndexMap<String, HistoryEntry>;

/// Status string ComfyUI reports for a failed prompt.
const STATUS_ERROR: &str = "error";

/// One finished prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Node ID → node output, in backend order.
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
}

/// Execution status block of a history record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[event_name, payload]` pairs, e.g. `["execution_error", {...}]`.
    #[serde(default)]
    pub messages: Vec<(String, Value)>,
}

/// First image found in a record's outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutput {
    pub node_id: String,
    pub filename: String,
}

impl HistoryEntry {
    /// Whether the backend reported the prompt as failed.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str == STATUS_ERROR)
    }

    /// Human-readable failure reason, if the backend provided one.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        status
            .messages
            .iter()
            .find(|(event, _)| event == "execution_error")
            .map(|(_, data)| {
                let node = data["node_id"].as_str().unwrap_or("?");
                let message = data["exception_message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .trim();
                format!("node {node}: {message}")
            })
    }

    /// The first output node carrying an `images` key, and the filename of
    /// that list's first entry.
    ///
    /// First in backend order, not "best": the first node with `images`
    /// decides, and if its list is empty or unusable there is no image even
    /// when a later node has one.
    pub fn first_image(&self) -> Option<ImageOutput> {
        let (node_id, output) = self
            .outputs
            .iter()
            .find(|(_, output)| output.get("images").is_some())?;
        let first = output["images"].as_array()?.first()?;
        let filename = first.get("filename")?.as_str()?;
        Some(ImageOutput {
            node_id: node_id.clone(),
            filename: filename.to_string(),
        })
    }
}
