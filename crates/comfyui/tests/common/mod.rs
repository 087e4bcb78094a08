//! Scripted ComfyUI backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use comfymcp_comfyui::api::{ComfyUIApiError, SubmitResponse};
use comfymcp_comfyui::backend::ComfyBackend;
use comfymcp_comfyui::history::History;
use comfymcp_comfyui::runner::PollConfig;
use serde_json::{json, Value};

pub const BASE_URL: &str = "http://comfy.test:8188";

/// How the fake answers `POST /prompt`.
pub enum SubmitBehavior {
    Accept(String),
    Reject(u16, String),
    Malformed,
}

/// One scripted answer to `GET /history/{id}`.
pub enum HistoryStep {
    Pending,
    Done(Value),
    Malformed,
    Status(u16),
}

pub struct ScriptedBackend {
    submit: SubmitBehavior,
    history: Mutex<VecDeque<HistoryStep>>,
    object_info: Mutex<Option<Value>>,
    pub submitted: Mutex<Vec<Value>>,
    pub history_calls: AtomicUsize,
    pub object_info_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(submit: SubmitBehavior, history: Vec<HistoryStep>) -> Self {
        Self {
            submit,
            history: Mutex::new(history.into()),
            object_info: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            history_calls: AtomicUsize::new(0),
            object_info_calls: AtomicUsize::new(0),
        }
    }

    /// Accepts as `prompt_id` "p1" and completes after `pending` polls.
    pub fn completing_after(pending: usize, outputs: Value) -> Self {
        let mut steps: Vec<HistoryStep> = (0..pending).map(|_| HistoryStep::Pending).collect();
        steps.push(HistoryStep::Done(json!({ "p1": { "outputs": outputs } })));
        Self::new(SubmitBehavior::Accept("p1".into()), steps)
    }

    pub fn with_object_info(self, info: Value) -> Self {
        *self.object_info.lock().unwrap() = Some(info);
        self
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn object_info_calls(&self) -> usize {
        self.object_info_calls.load(Ordering::SeqCst)
    }

    pub fn last_submitted(&self) -> Option<Value> {
        self.submitted.lock().unwrap().last().cloned()
    }
}

fn malformed() -> ComfyUIApiError {
    ComfyUIApiError::Decode(serde_json::from_str::<Value>("{not json").unwrap_err())
}

#[async_trait::async_trait]
impl ComfyBackend for ScriptedBackend {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn submit(
        &self,
        workflow: &Value,
        _client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submitted.lock().unwrap().push(workflow.clone());
        match &self.submit {
            SubmitBehavior::Accept(id) => Ok(SubmitResponse {
                prompt_id: id.clone(),
                number: 0,
            }),
            SubmitBehavior::Reject(status, body) => Err(ComfyUIApiError::ApiError {
                status: *status,
                body: body.clone(),
            }),
            SubmitBehavior::Malformed => Err(malformed()),
        }
    }

    async fn history(&self, _prompt_id: &str) -> Result<History, ComfyUIApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.history.lock().unwrap().pop_front();
        match step.unwrap_or(HistoryStep::Pending) {
            HistoryStep::Pending => Ok(History::new()),
            HistoryStep::Done(value) => Ok(serde_json::from_value(value)?),
            HistoryStep::Malformed => Err(malformed()),
            HistoryStep::Status(status) => Err(ComfyUIApiError::ApiError {
                status,
                body: "boom".into(),
            }),
        }
    }

    async fn object_info(&self, node_type: &str) -> Result<Value, ComfyUIApiError> {
        self.object_info_calls.fetch_add(1, Ordering::SeqCst);
        match self.object_info.lock().unwrap().clone() {
            Some(info) if info.get(node_type).is_some() => Ok(info),
            Some(_) => Ok(json!({})),
            None => Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "introspection unavailable".into(),
            }),
        }
    }
}

/// Poll schedule short enough for tests: 1ms doubling.
pub fn fast_poll(max_attempts: u32) -> PollConfig {
    PollConfig {
        initial_delay: Duration::from_millis(1),
        max_attempts,
        multiplier: 2.0,
    }
}

pub fn image_outputs(filename: &str) -> Value {
    json!({ "9": { "images": [{ "filename": filename, "subfolder": "", "type": "output" }] } })
}

pub fn checkpoint_info(models: &[&str]) -> Value {
    json!({
        "CheckpointLoaderSimple": {
            "input": { "required": { "ckpt_name": [models, {}] } }
        }
    })
}
