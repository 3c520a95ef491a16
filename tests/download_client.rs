//! Integration tests for the retrying client and the progress downloader.

mod support;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use taskhub_core::download::constants::DEFAULT_REFERER;
use taskhub_core::download::{DownloadProgress, ProgressCallback};
use taskhub_core::source::CatalogClient;
use taskhub_core::{ClientConfig, DownloadError, ProgressDownloader, RetryHttpClient, RetryPolicy};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::FlakyResponder;

fn fast_client(retry_count: u32) -> RetryHttpClient {
    RetryHttpClient::new(ClientConfig {
        request_delay: Duration::ZERO,
        retry_policy: RetryPolicy::new(
            retry_count,
            Duration::from_millis(10),
            Duration::from_millis(50),
        ),
        ..ClientConfig::default()
    })
    .expect("client should build")
}

/// Plain TCP responder for replies wiremock cannot produce. Every connection
/// gets `head`, then `body` after `body_delay`, then the socket closes.
async fn raw_server(
    head: &'static str,
    body: &'static [u8],
    body_delay: Duration,
) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let mut request = Vec::new();
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(head.as_bytes()).await;
                tokio::time::sleep(body_delay).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{addr}"), connections)
}

#[tokio::test]
async fn test_download_retries_until_success() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let (responder, requests) = FlakyResponder::new(2, b"finally");
    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let downloader = ProgressDownloader::new(fast_client(3), temp_dir.path());
    let file = downloader
        .download_file(
            &format!("{}/file", server.uri()),
            Path::new("file.bin"),
            Some("t1"),
            None,
        )
        .await
        .unwrap();

    assert_eq!(file.attempts, 3);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert_eq!(file.path, temp_dir.path().join("task_t1").join("file.bin"));
    assert_eq!(std::fs::read(&file.path).unwrap(), b"finally");
    assert_eq!(file.bytes, 7);
}

#[tokio::test]
async fn test_download_gives_up_after_retry_budget() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let (responder, requests) = FlakyResponder::new(usize::MAX, b"never");
    Mock::given(method("GET"))
        .and(path("/file"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let downloader = ProgressDownloader::new(fast_client(2), temp_dir.path());
    let err = downloader
        .download_file(
            &format!("{}/file", server.uri()),
            Path::new("file.bin"),
            None,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::RetriesExhausted { attempts: 3, .. }));
    assert!(matches!(
        err.last_error(),
        DownloadError::HttpStatus { status: 500, .. }
    ));
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_download_rejects_declared_size_over_limit() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    Mock::given(method("GET"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
        .mount(&server)
        .await;

    let downloader = ProgressDownloader::new(fast_client(0), temp_dir.path())
        .with_max_file_size(Some(16));
    let err = downloader
        .download_file(
            &format!("{}/big", server.uri()),
            Path::new("big.bin"),
            Some("t2"),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.last_error(),
        DownloadError::TooLarge {
            content_length: 64,
            max_bytes: 16,
            ..
        }
    ));
    assert!(!temp_dir.path().join("task_t2").join("big.bin").exists());
}

#[tokio::test]
async fn test_download_reports_byte_progress() {
    let server = MockServer::start().await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let body = vec![7u8; 4096];
    Mock::given(method("GET"))
        .and(path("/img/9_p0.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let seen: Arc<Mutex<Vec<DownloadProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |p: &DownloadProgress| {
        sink.lock().unwrap().push(p.clone());
    });

    let downloader = ProgressDownloader::new(fast_client(0), temp_dir.path());
    let destination = temp_dir.path().join("direct.png");
    let file = downloader
        .download_file(
            &format!("{}/img/9_p0.png", server.uri()),
            &destination,
            None,
            Some(callback),
        )
        .await
        .unwrap();
    assert_eq!(file.path, destination);

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("at least one progress report");
    assert_eq!(last.bytes_total, 4096);
    assert_eq!(last.bytes_downloaded, 4096);
    assert!((last.percent - 100.0).abs() < f64::EPSILON);
    assert_eq!(last.filename, "direct.png");
    assert!(seen.windows(2).all(|w| w[0].bytes_downloaded <= w[1].bytes_downloaded));
}

#[tokio::test]
async fn test_client_keeps_one_request_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let client = fast_client(0);
    let url = format!("{}/slow", server.uri());
    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        client.get_with_retry(&url),
        client.get_with_retry(&url),
        client.get_with_retry(&url),
    );
    let elapsed = started.elapsed();

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert!(
        elapsed >= Duration::from_millis(550),
        "requests overlapped: {elapsed:?}"
    );
}

#[tokio::test]
async fn test_client_returns_error_statuses_without_retry() {
    let server = MockServer::start().await;
    let (responder, requests) = FlakyResponder::new(usize::MAX, b"");
    Mock::given(method("GET"))
        .and(path("/api"))
        .respond_with(responder)
        .mount(&server)
        .await;

    let client = fast_client(3);
    let response = client
        .get_with_retry(&format!("{}/api", server.uri()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_catalog_requests_carry_session_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ajax/illust/42/pages"))
        .and(header("cookie", "PHPSESSID=abc"))
        .and(header("referer", DEFAULT_REFERER))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": false,
            "message": "",
            "body": [{ "urls": { "original": "https://i.example.net/img/42_p0.png" } }]
        })))
        .mount(&server)
        .await;

    let http = RetryHttpClient::new(ClientConfig {
        cookie: Some("PHPSESSID=abc".to_string()),
        request_delay: Duration::ZERO,
        ..ClientConfig::default()
    })
    .unwrap();
    let catalog = CatalogClient::new(http, server.uri());

    let pages = catalog.fetch_page_urls("42").await.unwrap();
    assert_eq!(pages, vec!["https://i.example.net/img/42_p0.png".to_string()]);
}

#[tokio::test]
async fn test_short_body_is_retried_and_leaves_no_file() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let (base, connections) = raw_server(
        "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n",
        b"hello",
        Duration::ZERO,
    )
    .await;

    let downloader = ProgressDownloader::new(fast_client(1), temp_dir.path());
    let err = downloader
        .download_file(
            &format!("{base}/x.bin"),
            Path::new("x.bin"),
            Some("t"),
            None,
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, DownloadError::RetriesExhausted { attempts: 2, .. }),
        "unexpected error: {err}"
    );
    assert!(matches!(
        err.last_error(),
        DownloadError::Network { .. } | DownloadError::Integrity { .. }
    ));
    assert_eq!(connections.load(Ordering::SeqCst), 2);
    assert!(!temp_dir.path().join("task_t").join("x.bin").exists());
}

#[tokio::test]
async fn test_transport_failure_uses_full_retry_budget() {
    // Nothing listens on port 1, so every attempt is refused.
    let client = fast_client(2);
    let err = client
        .get_with_retry("http://127.0.0.1:1/unreachable")
        .await
        .unwrap_err();

    assert!(
        matches!(err, DownloadError::RetriesExhausted { attempts: 3, .. }),
        "unexpected error: {err}"
    );
    assert!(matches!(err.last_error(), DownloadError::Network { .. }));
}

#[tokio::test]
async fn test_download_body_holds_the_request_slot() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let (base, _) = raw_server(
        "HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n",
        b"slow",
        Duration::from_millis(400),
    )
    .await;

    let client = fast_client(0);
    let downloader = ProgressDownloader::new(client.clone(), temp_dir.path());
    let url = format!("{base}/slow.bin");
    let started = Instant::now();
    let download = tokio::spawn(async move {
        downloader
            .download_file(&url, Path::new("slow.bin"), Some("t"), None)
            .await
    });

    // Headers of the download are back by now; its body is still pending.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client
        .get_with_retry(&format!("{base}/other"))
        .await
        .unwrap();
    let waited = started.elapsed();
    drop(response);

    let file = download.await.unwrap().unwrap();
    assert_eq!(file.bytes, 4);
    assert!(
        waited >= Duration::from_millis(350),
        "second request got through while the body was streaming: {waited:?}"
    );
}
