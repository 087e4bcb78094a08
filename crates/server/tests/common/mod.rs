//! Shared fixtures for the server integration tests: an in-memory ComfyUI
//! backend, a temporary template directory and the app builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use comfymcp_comfyui::api::{ComfyUIApiError, SubmitResponse};
use comfymcp_comfyui::backend::ComfyBackend;
use comfymcp_comfyui::client::ComfyUIClient;
use comfymcp_comfyui::history::History;
use comfymcp_comfyui::models::DEFAULT_MODEL_NODE;
use comfymcp_comfyui::runner::PollConfig;
use comfymcp_core::template::{FsTemplateStore, TemplateStore};
use comfymcp_server::config::ServerConfig;
use comfymcp_server::dispatcher::Dispatcher;
use comfymcp_server::router::build_app_router;
use comfymcp_server::state::AppState;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

pub const BASE_URL: &str = "http://comfy.test:8188";

/// Template with a single empty `text` slot and nothing else.
pub const BASIC_TEMPLATE: &str = r#"{
    "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}}
}"#;

/// A full text-to-image graph with dimension and checkpoint slots.
pub const OTHER_TEMPLATE: &str = r#"{
    "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "modelA"}},
    "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 1024, "height": 1024, "batch_size": 1}},
    "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "", "clip": ["4", 1]}},
    "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "watermark", "clip": ["4", 1]}},
    "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0], "filename_prefix": "ComfyUI"}}
}"#;

/// In-memory ComfyUI.
///
/// Every submitted job gets a fresh prompt ID and completes after
/// `pending_polls` pending answers with a single `<prompt_id>.png` image.
/// With `hang` set, history queries never return.
pub struct FakeBackend {
    models: Vec<String>,
    pending_polls: usize,
    hang: bool,
    next_id: AtomicUsize,
    polls: Mutex<HashMap<String, usize>>,
    pub submitted: Mutex<Vec<Value>>,
    /// Hanging history queries dropped before they returned.
    pub abandoned_polls: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            models: Vec::new(),
            pending_polls: 0,
            hang: false,
            next_id: AtomicUsize::new(1),
            polls: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            abandoned_polls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn pending_for(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn last_submitted(&self) -> Option<Value> {
        self.submitted.lock().unwrap().last().cloned()
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned_polls.load(Ordering::SeqCst)
    }
}

struct AbandonGuard(Arc<AtomicUsize>);

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ComfyBackend for FakeBackend {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn submit(
        &self,
        workflow: &Value,
        _client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submitted.lock().unwrap().push(workflow.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitResponse {
            prompt_id: format!("p{n}"),
            number: n as i64,
        })
    }

    async fn history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        if self.hang {
            let _guard = AbandonGuard(Arc::clone(&self.abandoned_polls));
            std::future::pending::<()>().await;
        }

        let seen = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(prompt_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if seen <= self.pending_polls {
            return Ok(History::new());
        }

        let record = json!({
            prompt_id: {
                "outputs": {
                    "9": {"images": [{"filename": format!("{prompt_id}.png"), "subfolder": "", "type": "output"}]}
                },
                "status": {"status_str": "success", "completed": true, "messages": []}
            }
        });
        Ok(serde_json::from_value(record)?)
    }

    async fn object_info(&self, node_type: &str) -> Result<Value, ComfyUIApiError> {
        if self.models.is_empty() {
            return Err(ComfyUIApiError::ApiError {
                status: 503,
                body: "introspection unavailable".into(),
            });
        }
        Ok(json!({
            node_type: {"input": {"required": {"ckpt_name": [self.models, {}]}}}
        }))
    }
}

pub fn fast_poll(max_attempts: u32) -> PollConfig {
    PollConfig {
        initial_delay: Duration::from_millis(1),
        max_attempts,
        multiplier: 2.0,
    }
}

/// Temporary template directory holding `basic_api_test.json` and `other.json`.
pub fn template_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("basic_api_test.json"), BASIC_TEMPLATE).unwrap();
    std::fs::write(dir.path().join("other.json"), OTHER_TEMPLATE).unwrap();
    dir
}

/// Dispatcher over `backend` and the templates in `dir`.
pub fn dispatcher(backend: Arc<FakeBackend>, dir: &TempDir) -> Arc<Dispatcher> {
    dispatcher_with_poll(backend, dir, fast_poll(8))
}

pub fn dispatcher_with_poll(
    backend: Arc<FakeBackend>,
    dir: &TempDir,
    poll: PollConfig,
) -> Arc<Dispatcher> {
    let backend: Arc<dyn ComfyBackend> = backend;
    let client = ComfyUIClient::new(backend, poll, DEFAULT_MODEL_NODE);
    let templates: Arc<dyn TemplateStore> = Arc::new(FsTemplateStore::new(dir.path()));
    Arc::new(Dispatcher::new(client, templates))
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        comfyui_url: BASE_URL.to_string(),
        request_timeout_secs: 30,
        ..ServerConfig::default()
    }
}

/// Build the full application router, with the same middleware stack the
/// binary uses.
pub fn build_test_app(dispatcher: Arc<Dispatcher>) -> Router {
    build_app_router(AppState::new(dispatcher, test_config()))
}

/// Serve `app` on an ephemeral localhost port and return its address.
pub async fn spawn_server(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: Router, uri: &str, body: impl Into<Body>) -> Response<Body> {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A `generate_image` envelope with string-encoded params.
pub fn generate_call(params: Value) -> Value {
    json!({"tool": "generate_image", "params": params.to_string()})
}
