use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

use chutes_proxy::fetcher::UtilizationFetcher;
use chutes_proxy::{RoutingConfig, UtilizationCache};

fn config(base: &str) -> RoutingConfig {
    RoutingConfig::default()
        .with_api_key("test-key")
        .with_api_base(base)
        .with_fetch_timeout(Duration::from_secs(2))
}

fn new_fetcher(config: &RoutingConfig) -> (UtilizationFetcher, Arc<UtilizationCache>) {
    let cache = Arc::new(UtilizationCache::new(Duration::from_secs(30)));
    (UtilizationFetcher::new(config, cache.clone()), cache)
}

/// Accepts connections and never answers them.
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            open.push(socket);
        }
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn fetch_parses_record_list_and_caches() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/chutes/utilization")
        .match_header("x-api-key", "test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[
                {"chute_id": "x", "name": "org/X",
                 "utilization_current": 0.1, "utilization_5m": 0.3},
                {"chute_id": "y", "name": "org/Y", "utilization_15m": 0.8}
            ]"#,
        )
        .expect(2)
        .create_async()
        .await;

    let (fetcher, cache) = new_fetcher(&config(&server.url()));
    assert_eq!(fetcher.fetch("x").await, Some(0.1));
    assert_eq!(fetcher.fetch("y").await, Some(0.8));
    assert_eq!(cache.get("x"), Some(0.1));
    assert_eq!(cache.get("y"), Some(0.8));
    mock.assert_async().await;
}

#[tokio::test]
async fn trailing_slash_in_base_is_ignored() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/chutes/utilization")
        .with_body(r#"{"utilization": 0.4}"#)
        .create_async()
        .await;

    let (fetcher, _) = new_fetcher(&config(&format!("{}/", server.url())));
    assert!(!fetcher.url().contains("//chutes"));
    assert_eq!(fetcher.fetch("any").await, Some(0.4));
    mock.assert_async().await;
}

#[tokio::test]
async fn no_api_key_skips_the_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/chutes/utilization")
        .with_body(r#"{"utilization": 0.4}"#)
        .expect(0)
        .create_async()
        .await;

    let config = RoutingConfig::default().with_api_base(server.url());
    let (fetcher, cache) = new_fetcher(&config);
    assert_eq!(fetcher.fetch("x").await, None);
    assert!(cache.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn error_status_is_absent() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/chutes/utilization")
        .with_status(500)
        .with_body(r#"{"utilization": 0.4}"#)
        .create_async()
        .await;

    let (fetcher, cache) = new_fetcher(&config(&server.url()));
    assert_eq!(fetcher.fetch("x").await, None);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn malformed_or_unknown_payload_is_absent() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/chutes/utilization")
        .with_body("<html>oops</html>")
        .create_async()
        .await;
    let (fetcher, _) = new_fetcher(&config(&server.url()));
    assert_eq!(fetcher.fetch("x").await, None);

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/chutes/utilization")
        .with_body(r#"[{"chute_id": "other", "utilization_current": 0.2}]"#)
        .create_async()
        .await;
    let (fetcher, cache) = new_fetcher(&config(&server.url()));
    assert_eq!(fetcher.fetch("x").await, None);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn unreachable_endpoint_is_absent() {
    // Nothing listens on the discard port.
    let (fetcher, _) = new_fetcher(&config("http://127.0.0.1:9"));
    assert_eq!(fetcher.fetch("x").await, None);
}

#[tokio::test]
async fn silent_endpoint_times_out() {
    let base = silent_server().await;
    let config = config(&base).with_fetch_timeout(Duration::from_millis(300));
    let (fetcher, cache) = new_fetcher(&config);

    let started = Instant::now();
    assert_eq!(fetcher.fetch("x").await, None);
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(250), "returned before the timeout: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(2), "timeout not enforced: {:?}", elapsed);
    assert!(cache.is_empty());
}
