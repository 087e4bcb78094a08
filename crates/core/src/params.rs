//! Caller-supplied parameters for one image-generation request.

use std::collections::BTreeSet;

use serde_json::json;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::resolver::{sanitize_model_name, validate_model, Resolver};

/// Template used when the caller does not name one.
pub const DEFAULT_TEMPLATE_ID: &str = "basic_api_test";

/// Width and height used when the caller does not provide them.
pub const DEFAULT_DIMENSION: u32 = 512;

/// Semantic parameters for a single `generate_image` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub model: Option<String>,
    pub template_id: String,
}

impl ParameterSet {
    /// A parameter set with only a prompt; everything else defaulted.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            width: None,
            height: None,
            model: None,
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
        }
    }

    /// Whether this request overrides the template's model.
    ///
    /// A name that is empty once quotes and whitespace are stripped does not.
    pub fn has_model(&self) -> bool {
        self.model
            .as_deref()
            .is_some_and(|m| m.chars().any(|c| !c.is_whitespace() && !matches!(c, '\'' | '"')))
    }

    /// Overlay these parameters onto `graph`.
    ///
    /// Order: prompt, width, height, model. Explicit values must land on a
    /// slot; defaulted dimensions only fill slots that exist. The model is
    /// sanitised and checked against `known_models` first.
    pub fn apply(
        &self,
        resolver: &Resolver,
        graph: &mut Graph,
        known_models: &BTreeSet<String>,
    ) -> Result<(), CoreError> {
        resolver.inject(graph, "prompt", Some(json!(self.prompt)))?;

        for (name, value) in [("width", self.width), ("height", self.height)] {
            match value {
                Some(v) => {
                    resolver.inject(graph, name, Some(json!(v)))?;
                }
                None => {
                    resolver.try_inject(graph, name, json!(DEFAULT_DIMENSION));
                }
            }
        }

        let model = self.model.as_deref().map(sanitize_model_name);
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            validate_model(&model, known_models)?;
            resolver.inject(graph, "model", Some(json!(model)))?;
        }

        Ok(())
    }
}
