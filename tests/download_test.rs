//! Download manager behavior against a mock image host.

mod common;

use std::time::Duration;

use common::{mount_png, png_bytes};
use country_image_harvester::config::Config;
use country_image_harvester::context::RunContext;
use country_image_harvester::dedup::DEFAULT_SIMILARITY_THRESHOLD;
use country_image_harvester::download::{DownloadManager, DownloadPolicy};
use country_image_harvester::error::ErrorKind;
use country_image_harvester::models::{DownloadStatus, ImageCandidate, StrategyKind};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn policy() -> DownloadPolicy {
    Config::for_testing().download_policy()
}

fn candidate(url: String) -> ImageCandidate {
    ImageCandidate {
        url,
        source_page_url: "https://search.test/".to_string(),
        declared_width: None,
        declared_height: None,
        format: None,
        strategy: StrategyKind::Thumbnail,
    }
}

#[tokio::test]
async fn test_not_found_is_permanent_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let staging = TempDir::new().unwrap();
    let ctx = RunContext::new();
    let manager = DownloadManager::new(policy(), ctx.clone()).unwrap();

    let results = manager
        .download_all(
            vec![candidate(format!("{}/img/missing.jpg", server.uri()))],
            staging.path(),
        )
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DownloadStatus::Failed);
    assert_eq!(results[0].error, Some(ErrorKind::DownloadPermanentFailure));
    assert_eq!(results[0].attempts, 1);
    assert!(results[0].local_path.is_none());
    assert_eq!(ctx.stats().snapshot().downloads_succeeded, 0);
}

#[tokio::test]
async fn test_server_error_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/flaky.png"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_png(&server, "/img/flaky.png", png_bytes(200, 200, 0)).await;
    let staging = TempDir::new().unwrap();
    let manager = DownloadManager::new(policy(), RunContext::new()).unwrap();

    let results = manager
        .download_all(
            vec![candidate(format!("{}/img/flaky.png", server.uri()))],
            staging.path(),
        )
        .await;

    assert_eq!(results[0].status, DownloadStatus::Success);
    assert_eq!(results[0].attempts, 3);
    assert_eq!(
        results[0].local_path.as_deref(),
        Some(staging.path().join("01.png").as_path())
    );
    assert!(results[0].byte_size > 0);
}

#[tokio::test]
async fn test_transient_failures_exhaust_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;
    let staging = TempDir::new().unwrap();
    let manager = DownloadManager::new(policy(), RunContext::new()).unwrap();

    let results = manager
        .download_all(vec![candidate(format!("{}/img/down.png", server.uri()))], staging.path())
        .await;

    assert_eq!(results[0].status, DownloadStatus::Failed);
    assert_eq!(results[0].error, Some(ErrorKind::DownloadTransientFailure));
    assert_eq!(results[0].attempts, 3);
}

#[tokio::test]
async fn test_non_image_responses_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/page.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html></html>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/corrupt.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\xFF\xD8\xFFnot really".to_vec()))
        .mount(&server)
        .await;
    mount_png(&server, "/img/tiny.png", png_bytes(40, 40, 0)).await;
    let staging = TempDir::new().unwrap();
    let manager = DownloadManager::new(policy(), RunContext::new()).unwrap();

    let results = manager
        .download_all(
            vec![
                candidate(format!("{}/img/page.jpg", server.uri())),
                candidate(format!("{}/img/corrupt.jpg", server.uri())),
                candidate(format!("{}/img/tiny.png", server.uri())),
            ],
            staging.path(),
        )
        .await;

    for result in &results {
        assert_eq!(result.status, DownloadStatus::Failed);
        assert_eq!(result.error, Some(ErrorKind::DownloadPermanentFailure));
        assert_eq!(result.attempts, 1);
    }
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

/// Answer one request with a chunked body of `chunks` x `chunk_size` bytes
/// and no content length. Returns how many body bytes were written before
/// the client hung up.
async fn serve_chunked(listener: TcpListener, chunk_size: usize, chunks: usize) -> usize {
    let Ok((mut socket, _)) = listener.accept().await else {
        return 0;
    };
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return 0,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let head = "HTTP/1.1 200 OK\r\ncontent-type: image/png\r\ntransfer-encoding: chunked\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return 0;
    }
    let data = vec![0u8; chunk_size];
    let frame = format!("{chunk_size:x}\r\n");
    let mut written = 0;
    for _ in 0..chunks {
        if socket.write_all(frame.as_bytes()).await.is_err()
            || socket.write_all(&data).await.is_err()
            || socket.write_all(b"\r\n").await.is_err()
        {
            break;
        }
        written += chunk_size;
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    written
}

#[tokio::test]
async fn test_oversized_chunked_body_abandoned_early() {
    const MIB: usize = 1024 * 1024;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_chunked(listener, MIB / 4, 256));

    let staging = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        DownloadPolicy {
            max_bytes: MIB as u64,
            ..policy()
        },
        RunContext::new(),
    )
    .unwrap();

    let results = manager
        .download_all(vec![candidate(format!("http://{addr}/huge.png"))], staging.path())
        .await;

    assert_eq!(results[0].status, DownloadStatus::Failed);
    assert_eq!(results[0].error, Some(ErrorKind::DownloadPermanentFailure));
    assert_eq!(results[0].attempts, 1);
    assert!(results[0].local_path.is_none());

    let written = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server should stop once the client hangs up")
        .unwrap();
    assert!(
        written < 32 * MIB,
        "client kept reading {} MiB of a 64 MiB body",
        written / MIB
    );
}

#[tokio::test]
async fn test_declared_length_over_cap_rejected() {
    let server = MockServer::start().await;
    mount_png(&server, "/img/big.png", png_bytes(400, 300, 0)).await;
    let staging = TempDir::new().unwrap();
    let manager = DownloadManager::new(
        DownloadPolicy {
            max_bytes: 64,
            ..policy()
        },
        RunContext::new(),
    )
    .unwrap();

    let results = manager
        .download_all(
            vec![candidate(format!("{}/img/big.png", server.uri()))],
            staging.path(),
        )
        .await;

    assert_eq!(results[0].status, DownloadStatus::Failed);
    assert_eq!(results[0].error, Some(ErrorKind::DownloadPermanentFailure));
    assert_eq!(results[0].attempts, 1);
}

#[tokio::test]
async fn test_concurrency_bound_and_order_preserved() {
    let server = MockServer::start().await;
    for n in 0..8u32 {
        // Earlier ranks answer slower so completions arrive out of order.
        let delay = Duration::from_millis(u64::from(160 - n * 20));
        Mock::given(method("GET"))
            .and(path(format!("/img/{n}.png")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_bytes(120, 120, n))
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
    }
    let staging = TempDir::new().unwrap();
    let ctx = RunContext::new();
    let manager = DownloadManager::new(
        DownloadPolicy {
            concurrency: 3,
            ..policy()
        },
        ctx.clone(),
    )
    .unwrap();

    let candidates: Vec<_> = (0..8)
        .map(|n| candidate(format!("{}/img/{n}.png", server.uri())))
        .collect();
    let results = manager.download_all(candidates.clone(), staging.path()).await;

    let stats = ctx.stats().snapshot();
    assert!(stats.peak_in_flight <= 3, "peak was {}", stats.peak_in_flight);
    assert!(stats.peak_in_flight >= 1);
    assert_eq!(stats.downloads_attempted, 8);
    assert_eq!(stats.downloads_succeeded, 8);

    for (index, (result, candidate)) in results.iter().zip(&candidates).enumerate() {
        assert_eq!(result.candidate.url, candidate.url);
        assert_eq!(
            result.local_path.as_deref(),
            Some(staging.path().join(format!("{:02}.png", index + 1)).as_path())
        );
    }
}

#[tokio::test]
async fn test_visual_duplicates_skipped() {
    let server = MockServer::start().await;
    let same = png_bytes(256, 256, 0);
    mount_png(&server, "/cdn-a/flag.png", same.clone()).await;
    mount_png(&server, "/cdn-b/flag.png", same).await;
    mount_png(&server, "/cdn-a/city.png", png_bytes(256, 256, 1)).await;
    let staging = TempDir::new().unwrap();
    let ctx = RunContext::new();
    let manager = DownloadManager::new(
        DownloadPolicy {
            dedup_threshold: Some(DEFAULT_SIMILARITY_THRESHOLD),
            ..policy()
        },
        ctx.clone(),
    )
    .unwrap();

    let results = manager
        .download_all(
            vec![
                candidate(format!("{}/cdn-a/flag.png", server.uri())),
                candidate(format!("{}/cdn-b/flag.png", server.uri())),
                candidate(format!("{}/cdn-a/city.png", server.uri())),
            ],
            staging.path(),
        )
        .await;

    assert_eq!(results[0].status, DownloadStatus::Success);
    assert_eq!(results[1].status, DownloadStatus::Skipped);
    assert!(results[1].local_path.is_none());
    assert!(!staging.path().join("02.png").exists());
    assert_eq!(results[2].status, DownloadStatus::Success);
    assert_eq!(ctx.stats().snapshot().downloads_succeeded, 2);
}

#[tokio::test]
async fn test_cancelled_before_start_skips_everything() {
    let server = MockServer::start().await;
    mount_png(&server, "/img/a.png", png_bytes(200, 200, 0)).await;
    let staging = TempDir::new().unwrap();
    let ctx = RunContext::new();
    ctx.cancel();
    let manager = DownloadManager::new(policy(), ctx).unwrap();

    let results = manager
        .download_all(vec![candidate(format!("{}/img/a.png", server.uri()))], staging.path())
        .await;

    assert_eq!(results[0].status, DownloadStatus::Skipped);
    assert_eq!(results[0].error, Some(ErrorKind::Cancelled));
    assert_eq!(results[0].attempts, 0);
}
