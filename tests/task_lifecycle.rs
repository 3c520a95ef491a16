//! Registry lifecycle against an on-disk database: listing, cleanup,
//! deletion, terminal-state rules and persistence across reopen.

mod support;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use taskhub_core::{
    CleanupScope, Database, TaskError, TaskFilter, TaskStatus, TaskType, assemble,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{fast_settings, finished};

async fn mount_generation(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [STANDARD.encode(b"png")],
            "info": {}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_list_filters_and_cleanup_scopes() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    mount_generation(&server).await;
    let db = Database::new(&temp_dir.path().join("tasks.db")).await.unwrap();
    let manager = assemble(db, fast_settings(temp_dir.path(), &server)).unwrap();

    let completed = manager
        .create_task("generate", r#"{"prompt": "dunes"}"#)
        .await
        .unwrap();
    // No executor for training tasks, so this one fails.
    let failed = manager.create_task("train", "{}").await.unwrap();
    assert_eq!(finished(&manager, &completed.id).await.status(), TaskStatus::Completed);
    assert_eq!(finished(&manager, &failed.id).await.status(), TaskStatus::Failed);

    let (all, total) = manager.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(all.len(), 2);

    let only_generate = TaskFilter {
        task_type: Some(TaskType::Generate),
        ..TaskFilter::default()
    };
    let (tasks, total) = manager.list_tasks(&only_generate).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(tasks[0].id, completed.id);

    let only_failed = TaskFilter {
        status: Some(TaskStatus::Failed),
        ..TaskFilter::default()
    };
    let (tasks, _) = manager.list_tasks(&only_failed).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, failed.id);

    let page_two = TaskFilter {
        page: 2,
        page_size: 1,
        ..TaskFilter::default()
    };
    let (tasks, total) = manager.list_tasks(&page_two).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(tasks.len(), 1);

    assert_eq!(manager.cleanup_tasks(CleanupScope::Failed).await.unwrap(), 1);
    assert!(matches!(
        manager.get_task(&failed.id).await,
        Err(TaskError::NotFound(_))
    ));
    assert_eq!(manager.cleanup_tasks(CleanupScope::All).await.unwrap(), 1);
    let (_, total) = manager.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_delete_removes_finished_task_only() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    mount_generation(&server).await;
    let db = Database::new(&temp_dir.path().join("tasks.db")).await.unwrap();
    let manager = assemble(db, fast_settings(temp_dir.path(), &server)).unwrap();

    let kept = manager
        .create_task("generate", r#"{"prompt": "dunes"}"#)
        .await
        .unwrap();
    let doomed = manager
        .create_task("generate", r#"{"prompt": "cliffs"}"#)
        .await
        .unwrap();
    finished(&manager, &kept.id).await;
    finished(&manager, &doomed.id).await;

    manager.delete_task(&doomed.id).await.unwrap();
    assert!(matches!(
        manager.get_task(&doomed.id).await,
        Err(TaskError::NotFound(_))
    ));
    assert!(matches!(
        manager.delete_task(&doomed.id).await,
        Err(TaskError::NotFound(_))
    ));
    let (tasks, total) = manager.list_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(tasks[0].id, kept.id);
}

#[tokio::test]
async fn test_delete_refuses_running_task() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "images": [STANDARD.encode(b"png")], "info": {} }))
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let db = Database::new_in_memory().await.unwrap();
    let manager = assemble(db, fast_settings(temp_dir.path(), &server)).unwrap();

    let task = manager
        .create_task("generate", r#"{"prompt": "dunes"}"#)
        .await
        .unwrap();
    assert!(matches!(
        manager.delete_task(&task.id).await,
        Err(TaskError::AlreadyRunning(_))
    ));

    let done = finished(&manager, &task.id).await;
    assert_eq!(done.status(), TaskStatus::Completed);
    manager.delete_task(&task.id).await.unwrap();
}

#[tokio::test]
async fn test_terminal_state_rules() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    mount_generation(&server).await;
    let db = Database::new_in_memory().await.unwrap();
    let manager = assemble(db, fast_settings(temp_dir.path(), &server)).unwrap();

    let task = manager
        .create_task("generate", r#"{"prompt": "dunes"}"#)
        .await
        .unwrap();
    let done = finished(&manager, &task.id).await;
    assert_eq!(done.status(), TaskStatus::Completed);

    assert!(matches!(
        manager.cancel_task(&task.id).await,
        Err(TaskError::AlreadyTerminal(_))
    ));
    assert!(matches!(
        manager.stop_task(&task.id).await,
        Err(TaskError::NotRunning {
            status: TaskStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        manager.create_task("render", "{}").await,
        Err(TaskError::InvalidType(_))
    ));
    assert!(matches!(
        manager.get_task("missing").await,
        Err(TaskError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tasks_survive_reopen() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    mount_generation(&server).await;
    let db_path = temp_dir.path().join("tasks.db");

    let id = {
        let db = Database::new(&db_path).await.unwrap();
        let manager = assemble(db, fast_settings(temp_dir.path(), &server)).unwrap();
        let task = manager
            .create_task("generate", r#"{"prompt": "dunes"}"#)
            .await
            .unwrap();
        finished(&manager, &task.id).await;
        task.id
    };

    let db = Database::new(&db_path).await.unwrap();
    assert!(db.is_wal_enabled().await.unwrap());
    let manager = assemble(db, fast_settings(temp_dir.path(), &server)).unwrap();
    let task = manager.get_task(&id).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task.images_downloaded, 1);
    assert!(task.result_json().is_some());
}
