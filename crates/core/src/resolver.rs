//! Parameter injection.
//!
//! Callers describe a job with semantic parameters (`prompt`, `width`,
//! `model`, ...) and never see slot names. The [`Resolver`] maps each
//! parameter to candidate slot names through an alias table and
//! overwrites the first matching slot in graph declaration order.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::CoreError;
use crate::graph::{Graph, NodeId};

/// Semantic parameter name → candidate slot names in priority order.
///
/// Parameters missing from this table resolve to a slot named after
/// the parameter itself.
pub const DEFAULT_ALIASES: &[(&str, &[&str])] = &[
    ("prompt", &["text", "prompt"]),
    ("model", &["ckpt_name", "unet_name"]),
];

/// Location of a resolved input slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRef {
    pub node_id: NodeId,
    pub slot: String,
}

/// Resolves semantic parameters onto graph input slots.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    aliases: &'static [(&'static str, &'static [&'static str])],
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_ALIASES)
    }
}

impl Resolver {
    pub fn new(aliases: &'static [(&'static str, &'static [&'static str])]) -> Self {
        Self { aliases }
    }

    /// Candidate slot names for `parameter`, highest priority first.
    pub fn candidates<'a>(&self, parameter: &'a str) -> Vec<&'a str> {
        match self.aliases.iter().find(|(name, _)| *name == parameter) {
            Some((_, slots)) => slots.to_vec(),
            None => vec![parameter],
        }
    }

    /// Find the slot `parameter` resolves to.
    ///
    /// Nodes are scanned in declaration order and, within a node, aliases
    /// in priority order. The first node/alias pair present wins.
    pub fn locate(&self, graph: &Graph, parameter: &str) -> Option<SlotRef> {
        let candidates = self.candidates(parameter);
        graph.iter().find_map(|(node_id, node)| {
            candidates
                .iter()
                .find(|slot| node.inputs.contains_key(**slot))
                .map(|slot| SlotRef {
                    node_id: node_id.clone(),
                    slot: (*slot).to_string(),
                })
        })
    }

    /// Overwrite the slot `parameter` resolves to, if any.
    ///
    /// Returns the slot that was written, or `None` when no slot matched.
    pub fn try_inject(&self, graph: &mut Graph, parameter: &str, value: Value) -> Option<SlotRef> {
        let target = self.locate(graph, parameter)?;
        let node = graph.node_mut(&target.node_id)?;
        node.inputs.insert(target.slot.clone(), value);
        tracing::debug!(
            parameter,
            node_id = %target.node_id,
            slot = %target.slot,
            "Injected parameter",
        );
        Some(target)
    }

    /// Overwrite the slot `parameter` resolves to.
    ///
    /// An absent (`None` or JSON `null`) value is skipped. A present value
    /// with no matching slot anywhere in the graph fails with
    /// [`CoreError::InputKeyNotFound`].
    pub fn inject<'g>(
        &self,
        graph: &'g mut Graph,
        parameter: &str,
        value: Option<Value>,
    ) -> Result<&'g mut Graph, CoreError> {
        let value = match value {
            Some(Value::Null) | None => return Ok(graph),
            Some(value) => value,
        };
        match self.try_inject(graph, parameter, value) {
            Some(_) => Ok(graph),
            None => Err(CoreError::InputKeyNotFound(parameter.to_string())),
        }
    }
}

/// Strip quote characters that upstream callers sometimes leave in model
/// names (e.g. `modelA'`).
pub fn sanitize_model_name(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !matches!(c, '\'' | '"')).collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned != raw {
        tracing::info!(original = raw, corrected = %cleaned, "Corrected model name");
    }
    cleaned
}

/// Check `model` against the known model set.
///
/// An empty set means the backend could not be asked, so any name passes.
pub fn validate_model(model: &str, known: &BTreeSet<String>) -> Result<(), CoreError> {
    if known.is_empty() || known.contains(model) {
        return Ok(());
    }
    Err(CoreError::ModelNotAvailable {
        model: model.to_string(),
        available: known.iter().cloned().collect(),
    })
}
