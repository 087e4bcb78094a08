//! Tool-dispatch wire protocol.
//!
//! A call is an envelope `{"tool": <name>, "params": <JSON string>}`,
//! optionally carrying an `"id"`. Responses are `{"image_url": ...}`,
//! a plain list of template IDs, or `{"error": ...}`. When the call had
//! an `id`, the response is wrapped as `{"id": ..., "result": ...}`.

use comfymcp_core::params::{ParameterSet, DEFAULT_TEMPLATE_ID};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{DispatchError, DispatchResult};

/// Capability name: run a template and return the image URL.
pub const GENERATE_IMAGE: &str = "generate_image";

/// Capability name: list template IDs.
pub const LIST_TEMPLATES: &str = "list_templates";

/// Older name for [`LIST_TEMPLATES`], still accepted.
const LIST_WORKFLOWS: &str = "list_workflows";

/// Raw inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    /// JSON-encoded params string; an inline object is also accepted.
    #[serde(default)]
    pub params: Value,
    /// Correlation ID echoed back in the response.
    #[serde(default)]
    pub id: Option<Value>,
}

impl ToolCall {
    /// Decode an envelope from an already-parsed JSON value.
    pub fn from_value(value: &Value) -> DispatchResult<Self> {
        if !value.is_object() {
            return Err(DispatchError::MalformedPayload(
                "envelope must be a JSON object".into(),
            ));
        }
        Self::deserialize(value).map_err(|e| DispatchError::MalformedPayload(e.to_string()))
    }

    /// The params payload as a JSON object.
    ///
    /// `null`/absent params decode as `{}`.
    pub fn params_object(&self) -> DispatchResult<Map<String, Value>> {
        let value = match &self.params {
            Value::Null => return Ok(Map::new()),
            Value::String(text) if text.trim().is_empty() => return Ok(Map::new()),
            Value::String(text) => serde_json::from_str(text)
                .map_err(|e| DispatchError::MalformedPayload(format!("params: {e}")))?,
            other => other.clone(),
        };
        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            _ => Err(DispatchError::MalformedPayload(
                "params must be a JSON object".into(),
            )),
        }
    }
}

/// A decoded tool call, one variant per capability.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    GenerateImage(ParameterSet),
    ListTemplates,
}

impl ToolRequest {
    /// Route by tool name, then decode that tool's params.
    pub fn decode(call: &ToolCall) -> DispatchResult<Self> {
        match call.tool.as_str() {
            GENERATE_IMAGE => {
                let params = call.params_object()?;
                Ok(Self::GenerateImage(decode_generate_params(&params)?))
            }
            LIST_TEMPLATES | LIST_WORKFLOWS => Ok(Self::ListTemplates),
            other => Err(DispatchError::UnknownCapability(other.to_string())),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::GenerateImage(_) => GENERATE_IMAGE,
            Self::ListTemplates => LIST_TEMPLATES,
        }
    }
}

/// Outbound response payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Image { image_url: String },
    Templates(Vec<String>),
    Error { error: String },
}

impl ToolResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}

impl From<DispatchError> for ToolResponse {
    fn from(error: DispatchError) -> Self {
        Self::error(error.to_string())
    }
}

/// Attach the caller's correlation ID, if any.
pub fn wrap_response(id: Option<Value>, response: Value) -> Value {
    match id {
        Some(id) if !id.is_null() => json!({ "id": id, "result": response }),
        _ => response,
    }
}

// ---- params decoding ----

fn decode_generate_params(params: &Map<String, Value>) -> DispatchResult<ParameterSet> {
    let prompt = match params.get("prompt") {
        Some(Value::String(p)) if !p.trim().is_empty() => p.clone(),
        Some(Value::String(_)) => {
            return Err(DispatchError::MalformedPayload("prompt must not be empty".into()))
        }
        Some(Value::Null) | None => {
            return Err(DispatchError::MalformedPayload("missing required param: prompt".into()))
        }
        Some(_) => return Err(DispatchError::MalformedPayload("prompt must be a string".into())),
    };

    let template_id = optional_string(params, "workflow_id")?
        .or(optional_string(params, "template_id")?)
        .unwrap_or_else(|| DEFAULT_TEMPLATE_ID.to_string());

    Ok(ParameterSet {
        prompt,
        width: dimension(params, "width")?,
        height: dimension(params, "height")?,
        model: optional_string(params, "model")?,
        template_id,
    })
}

/// A string param where `null` and `""` mean absent.
fn optional_string(params: &Map<String, Value>, name: &str) -> DispatchResult<Option<String>> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(DispatchError::MalformedPayload(format!("{name} must be a string"))),
    }
}

/// A positive pixel dimension, given as a number or a numeric string.
fn dimension(params: &Map<String, Value>, name: &str) -> DispatchResult<Option<u32>> {
    let invalid = || DispatchError::MalformedPayload(format!("{name} must be a positive integer"));
    let parsed = match params.get(name) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<u32>().map_err(|_| invalid())?,
        Some(Value::Number(n)) => match (n.as_u64(), n.as_f64()) {
            (Some(v), _) => u32::try_from(v).map_err(|_| invalid())?,
            (None, Some(f)) if f.fract() == 0.0 && f > 0.0 && f <= u32::MAX as f64 => f as u32,
            _ => return Err(invalid()),
        },
        Some(_) => return Err(invalid()),
    };
    if parsed == 0 {
        return Err(invalid());
    }
    Ok(Some(parsed))
}
