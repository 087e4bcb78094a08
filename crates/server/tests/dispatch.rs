//! End-to-end tool dispatch through the in-process call surface.

mod common;

use std::sync::Arc;
use std::time::Duration;

use comfymcp_core::params::ParameterSet;
use comfymcp_server::protocol::{ToolRequest, ToolResponse};
use common::{dispatcher, dispatcher_with_poll, fast_poll, generate_call, template_dir, FakeBackend};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn unknown_tool_returns_error_envelope() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    let response = dispatcher
        .dispatch(&json!({"tool": "nonexistent_tool", "params": "{}"}))
        .await;

    assert_eq!(response, json!({"error": "unknown tool"}));
}

#[tokio::test]
async fn list_templates_returns_every_template_id() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    let response = dispatcher
        .dispatch(&json!({"tool": "list_templates", "params": "{}"}))
        .await;

    let mut ids: Vec<String> = serde_json::from_value(response).unwrap();
    ids.sort();
    assert_eq!(ids, vec!["basic_api_test", "other"]);
}

#[tokio::test]
async fn generate_injects_prompt_into_default_template() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().pending_for(2));
    let dispatcher = dispatcher(Arc::clone(&backend), &dir);

    let response = dispatcher
        .dispatch(&generate_call(json!({"prompt": "A test prompt"})))
        .await;

    assert_eq!(
        response,
        json!({"image_url": "http://comfy.test:8188/view?filename=p1.png&subfolder=&type=output"})
    );
    let submitted = backend.last_submitted().unwrap();
    assert_eq!(submitted["6"]["inputs"]["text"], "A test prompt");
    assert!(submitted["6"]["inputs"].get("width").is_none());
}

#[tokio::test]
async fn generate_applies_overrides_to_named_template() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().with_models(&["modelA", "modelB"]));
    let dispatcher = dispatcher(Arc::clone(&backend), &dir);

    let response = dispatcher
        .dispatch(&generate_call(json!({
            "prompt": "a red fox",
            "width": 640,
            "workflow_id": "other",
            "model": "modelB\""
        })))
        .await;

    assert!(response.get("image_url").is_some(), "{response}");
    let submitted = backend.last_submitted().unwrap();
    assert_eq!(submitted["4"]["inputs"]["ckpt_name"], "modelB");
    assert_eq!(submitted["5"]["inputs"]["width"], 640);
    assert_eq!(submitted["5"]["inputs"]["height"], 512);
    assert_eq!(submitted["6"]["inputs"]["text"], "a red fox");
    assert_eq!(submitted["7"]["inputs"]["text"], "watermark");
}

#[tokio::test]
async fn quoted_model_name_validates_after_stripping() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().with_models(&["modelA"]));
    let dispatcher = dispatcher(Arc::clone(&backend), &dir);

    let response = dispatcher
        .dispatch(&generate_call(json!({
            "prompt": "p",
            "workflow_id": "other",
            "model": "modelA'"
        })))
        .await;

    assert!(response.get("image_url").is_some(), "{response}");
    assert_eq!(backend.last_submitted().unwrap()["4"]["inputs"]["ckpt_name"], "modelA");
}

#[tokio::test]
async fn unavailable_model_is_rejected_before_submission() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().with_models(&["modelA"]));
    let dispatcher = dispatcher(Arc::clone(&backend), &dir);

    let response = dispatcher
        .dispatch(&generate_call(json!({
            "prompt": "p",
            "workflow_id": "other",
            "model": "modelZ"
        })))
        .await;

    let error = response["error"].as_str().unwrap();
    assert!(error.contains("modelZ"), "{error}");
    assert_eq!(backend.submit_count(), 0);
}

#[tokio::test]
async fn explicit_dimension_without_slot_is_an_error() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    let response = dispatcher
        .dispatch(&generate_call(json!({"prompt": "p", "width": 768})))
        .await;

    assert_eq!(
        response,
        json!({"error": "No input slot found for parameter 'width'"})
    );
}

#[tokio::test]
async fn missing_template_is_reported() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    let response = dispatcher
        .dispatch(&generate_call(json!({"prompt": "p", "workflow_id": "nope"})))
        .await;

    assert_eq!(response, json!({"error": "Workflow template 'nope' not found"}));
}

#[tokio::test]
async fn polling_timeout_is_reported_with_elapsed_time() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().pending_for(100));
    let dispatcher = dispatcher_with_poll(Arc::clone(&backend), &dir, fast_poll(3));

    let response = dispatcher
        .dispatch(&generate_call(json!({"prompt": "p"})))
        .await;

    let error = response["error"].as_str().unwrap();
    assert!(
        error.starts_with("Workflow did not complete within"),
        "{error}"
    );
}

#[tokio::test]
async fn malformed_payloads_become_error_envelopes() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    for envelope in [
        json!("just a string"),
        json!({"params": "{}"}),
        json!({"tool": "generate_image", "params": "{not json"}),
        json!({"tool": "generate_image", "params": "{\"prompt\": \"\"}"}),
    ] {
        let response = dispatcher.dispatch(&envelope).await;
        let error = response["error"].as_str().unwrap_or_default();
        assert!(error.starts_with("malformed request"), "{envelope} -> {response}");
    }
}

#[tokio::test]
async fn raw_text_that_is_not_json_is_malformed() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    let text = dispatcher
        .dispatch_text("tool=generate_image", &CancellationToken::new())
        .await;

    let response: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(response["error"]
        .as_str()
        .unwrap()
        .starts_with("malformed request"));
}

#[tokio::test]
async fn id_is_echoed_around_the_result() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);

    let ok = dispatcher
        .dispatch(&json!({"id": "req-1", "tool": "list_templates"}))
        .await;
    assert_eq!(ok["id"], "req-1");
    assert!(ok["result"].is_array());

    let err = dispatcher
        .dispatch(&json!({"id": 2, "tool": "nonexistent_tool"}))
        .await;
    assert_eq!(err, json!({"id": 2, "result": {"error": "unknown tool"}}));
}

#[tokio::test]
async fn typed_call_surface() {
    let dir = template_dir();
    let dispatcher = dispatcher(Arc::new(FakeBackend::new()), &dir);
    let cancel = CancellationToken::new();

    let response = dispatcher
        .call(
            ToolRequest::GenerateImage(ParameterSet::new("typed")),
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(response, ToolResponse::Image { .. }));

    let templates = dispatcher
        .call(ToolRequest::ListTemplates, &cancel)
        .await
        .unwrap();
    assert_eq!(templates.into_value().as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn cancellation_aborts_an_in_flight_job() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().hanging());
    let dispatcher = dispatcher(Arc::clone(&backend), &dir);
    let cancel = CancellationToken::new();

    let task = {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch_with_cancel(&generate_call(json!({"prompt": "p"})), &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let response = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(response.get("error").is_some(), "{response}");
    assert_eq!(backend.abandoned(), 1);
}

#[tokio::test]
async fn concurrent_calls_each_get_their_own_graph() {
    let dir = template_dir();
    let backend = Arc::new(FakeBackend::new().pending_for(3));
    let dispatcher = dispatcher(Arc::clone(&backend), &dir);

    let calls = (0..8).map(|i| {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .dispatch(&generate_call(json!({"prompt": format!("prompt {i}")})))
                .await
        })
    });
    let responses = futures::future::join_all(calls).await;

    for response in responses {
        assert!(response.unwrap().get("image_url").is_some());
    }
    let submitted = backend.submitted.lock().unwrap().clone();
    let mut prompts: Vec<String> = submitted
        .iter()
        .map(|g| g["6"]["inputs"]["text"].as_str().unwrap().to_string())
        .collect();
    prompts.sort();
    let expected: Vec<String> = {
        let mut v: Vec<String> = (0..8).map(|i| format!("prompt {i}")).collect();
        v.sort();
        v
    };
    assert_eq!(prompts, expected);
}
