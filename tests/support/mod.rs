//! Shared fixtures for the integration tests: fast engine settings, an
//! in-memory task manager, and catalog/backend mocks.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use taskhub_core::{Database, EngineSettings, Task, TaskManager, assemble};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Settings with millisecond backoff and no politeness delay, pointed at `server`.
pub fn fast_settings(download_root: &Path, server: &MockServer) -> EngineSettings {
    EngineSettings {
        download_root: download_root.to_path_buf(),
        catalog_base_url: server.uri(),
        generation_base_url: server.uri(),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(10),
        retry_count: 2,
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
        default_request_delay: Duration::ZERO,
        ..EngineSettings::default()
    }
}

/// Task manager over a fresh in-memory database.
pub async fn manager(settings: EngineSettings) -> TaskManager {
    let db = Database::new_in_memory()
        .await
        .expect("in-memory database should open");
    assemble(db, settings).expect("settings should be valid")
}

/// Waits for `id` to finish, failing the test after ten seconds.
pub async fn finished(manager: &TaskManager, id: &str) -> Task {
    tokio::time::timeout(Duration::from_secs(10), manager.wait_for_terminal(id))
        .await
        .expect("task should finish in time")
        .expect("task should be readable")
}

/// Crawl config JSON for a tag search.
pub fn tag_crawl(query: &str, limit: u32) -> String {
    json!({ "subkind": "tag", "query": query, "limit": limit, "delay": 0 }).to_string()
}

/// Mounts a single-page tag search returning `ids`.
pub async fn mount_tag_search(server: &MockServer, query: &str, ids: &[&str]) {
    let data: Vec<_> = ids
        .iter()
        .map(|id| json!({ "id": id, "title": format!("work {id}"), "tags": ["landscape"] }))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/ajax/search/artworks/{query}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": false,
            "message": "",
            "body": { "illustManga": { "data": data, "total": ids.len() } }
        })))
        .mount(server)
        .await;
}

/// Mounts the page listing of `id` with `pages` image URLs on `server`.
pub async fn mount_pages(server: &MockServer, id: &str, pages: usize) {
    let body: Vec<_> = (0..pages)
        .map(|page| json!({ "urls": { "original": image_url(server, id, page) } }))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/ajax/illust/{id}/pages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": false,
            "message": "",
            "body": body
        })))
        .mount(server)
        .await;
}

/// Mounts the image bytes for one page.
pub async fn mount_image(server: &MockServer, id: &str, page: usize, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(image_path(id, page)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

pub fn image_path(id: &str, page: usize) -> String {
    format!("/img/{id}_p{page}.jpg")
}

pub fn image_url(server: &MockServer, id: &str, page: usize) -> String {
    format!("{}{}", server.uri(), image_path(id, page))
}

/// Responder that fails the first `fail_count` requests with 500, then returns 200 with body.
pub struct FlakyResponder {
    pub request_count: Arc<AtomicUsize>,
    pub fail_count: usize,
    pub success_body: Vec<u8>,
}

impl FlakyResponder {
    pub fn new(fail_count: usize, success_body: &[u8]) -> (Self, Arc<AtomicUsize>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                request_count: Arc::clone(&request_count),
                fail_count,
                success_body: success_body.to_vec(),
            },
            request_count,
        )
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(500).set_body_bytes(b"internal server error".to_vec())
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.success_body.clone())
        }
    }
}
