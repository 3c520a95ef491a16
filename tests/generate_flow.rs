//! End-to-end generation tasks against a mock backend.

mod support;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use taskhub_core::{TaskError, TaskStatus};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{fast_settings, finished, manager};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n-generated-";

#[tokio::test]
async fn test_generate_saves_every_image() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let encoded = STANDARD.encode(PNG_BYTES);
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(body_partial_json(json!({
            "prompt": "a lighthouse <lora:watercolor:0.6>",
            "batch_size": 2,
            "steps": 12
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [encoded, format!("data:image/png;base64,{encoded}")],
            "info": "{\"seed\": 1234}"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let manager = manager(fast_settings(temp_dir.path(), &server)).await;

    let config = json!({
        "prompt": "a lighthouse",
        "steps": 12,
        "batchSize": 2,
        "loras": [{ "name": "watercolor", "weight": 0.6 }]
    });
    let task = manager
        .create_task("generate", &config.to_string())
        .await
        .unwrap();
    let done = finished(&manager, &task.id).await;

    assert_eq!(done.status(), TaskStatus::Completed, "error: {}", done.error_message);
    assert_eq!(done.progress, 100);
    assert_eq!(done.images_found, 2);
    assert_eq!(done.images_downloaded, 2);

    let task_dir = temp_dir.path().join(format!("task_{}", task.id));
    for index in 0..2 {
        let saved = std::fs::read(task_dir.join(format!("gen_{index}.png"))).unwrap();
        assert_eq!(saved, PNG_BYTES);
    }

    let result = done.result_json().unwrap();
    assert_eq!(result["images_generated"], 2);
    assert_eq!(result["images_saved"], 2);
    assert_eq!(result["files"].as_array().unwrap().len(), 2);
    assert_eq!(result["info"]["seed"], 1234);
}

#[tokio::test]
async fn test_generate_backend_error_fails_task() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
        .mount(&server)
        .await;
    let manager = manager(fast_settings(temp_dir.path(), &server)).await;

    let task = manager
        .create_task("generate", r#"{"prompt": "a lighthouse"}"#)
        .await
        .unwrap();
    let done = finished(&manager, &task.id).await;

    assert_eq!(done.status(), TaskStatus::Failed);
    assert!(done.error_message.contains("500"), "{}", done.error_message);
    assert!(done.error_message.contains("CUDA out of memory"));
    assert_eq!(done.images_downloaded, 0);
}

#[tokio::test]
async fn test_generate_rejects_corrupt_image() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": ["%%% not base64 %%%"],
            "info": {}
        })))
        .mount(&server)
        .await;
    let manager = manager(fast_settings(temp_dir.path(), &server)).await;

    let task = manager
        .create_task("generate", r#"{"prompt": "a lighthouse"}"#)
        .await
        .unwrap();
    let done = finished(&manager, &task.id).await;

    assert_eq!(done.status(), TaskStatus::Failed);
    assert!(!done.error_message.is_empty());
}

#[tokio::test]
async fn test_generate_invalid_config_is_rejected_at_create() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let manager = manager(fast_settings(temp_dir.path(), &server)).await;

    let err = manager
        .create_task("generate", r#"{"prompt": "x", "steps": 0}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::InvalidConfig { .. }));

    let (tasks, total) = manager
        .list_tasks(&taskhub_core::TaskFilter::default())
        .await
        .unwrap();
    assert!(tasks.is_empty());
    assert_eq!(total, 0);
}
