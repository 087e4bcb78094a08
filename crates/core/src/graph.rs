//! In-memory job graph.
//!
//! A [`Graph`] is the API-format ComfyUI workflow: a JSON object mapping
//! node IDs to `{ "class_type": ..., "inputs": { ... } }`. Node order is
//! the declaration order of the source document and is significant for
//! parameter resolution, so nodes live in an [`IndexMap`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node identifier (the string key of the workflow JSON object).
pub type NodeId = String;

/// A single computation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// ComfyUI class type (e.g. "KSampler", "CLIPTextEncode").
    pub class_type: String,
    /// Input slots keyed by slot name. Values are literals or links
    /// (`["<node_id>", <output_index>]`).
    #[serde(default)]
    pub inputs: IndexMap<String, Value>,
    /// Any other per-node fields (e.g. `_meta`), passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Node {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: IndexMap::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// Builder-style helper for setting an input slot.
    pub fn with_input(mut self, slot: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(slot.into(), value);
        self
    }

    pub fn input(&self, slot: &str) -> Option<&Value> {
        self.inputs.get(slot)
    }
}

/// A job graph: nodes in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: IndexMap<NodeId, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a graph from a workflow JSON document.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Append a node, keeping declaration order. Replacing an existing ID
    /// keeps its original position.
    pub fn insert(&mut self, id: impl Into<NodeId>, node: Node) {
        self.nodes.insert(id.into(), node);
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Iterate nodes in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&NodeId, &mut Node)> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize into the JSON value submitted to the backend.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASIC: &str = r#"{
        "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "v1-5.safetensors"}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512, "batch_size": 1}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}, "_meta": {"title": "Save"}}
    }"#;

    #[test]
    fn preserves_declaration_order() {
        let graph = Graph::from_json(BASIC).unwrap();
        let ids: Vec<&str> = graph.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["4", "6", "5", "9"]);
    }

    #[test]
    fn parses_class_type_and_inputs() {
        let graph = Graph::from_json(BASIC).unwrap();
        let node = graph.node("5").unwrap();
        assert_eq!(node.class_type, "EmptyLatentImage");
        assert_eq!(node.input("width"), Some(&json!(512)));
        assert_eq!(node.input("missing"), None);
    }

    #[test]
    fn passes_through_unknown_node_fields() {
        let graph = Graph::from_json(BASIC).unwrap();
        let value = graph.to_value();
        assert_eq!(value["9"]["_meta"]["title"], "Save");
        assert_eq!(value["6"]["inputs"]["clip"], json!(["4", 1]));
    }

    #[test]
    fn node_without_inputs_defaults_to_empty() {
        let graph = Graph::from_json(r#"{"1": {"class_type": "Noop"}}"#).unwrap();
        assert!(graph.node("1").unwrap().inputs.is_empty());
    }

    #[test]
    fn rejects_non_object_document() {
        assert!(Graph::from_json("[1, 2, 3]").is_err());
        assert!(Graph::from_json(r#"{"1": {"inputs": {}}}"#).is_err());
    }

    #[test]
    fn builder_inserts_in_order() {
        let mut graph = Graph::new();
        graph.insert("b", Node::new("B").with_input("text", json!("")));
        graph.insert("a", Node::new("A"));
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.iter().next().unwrap().0, "b");
    }
}
