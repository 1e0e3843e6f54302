//! HttpFetcher behavior against a local mock server.

use spec_resolver::fetcher::{FetchOptions, Fetcher, HttpFetcher, Refresh};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve(server: &MockServer, at: &str, body: &str, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_once_fetches_each_url_once_per_run() {
    let server = MockServer::start().await;
    serve(&server, "/spec", "<p>spec</p>", 1).await;
    let fetcher = HttpFetcher::new(5_000);
    let url = format!("{}/spec", server.uri());

    let first = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();
    let second = fetcher.fetch(&url, &FetchOptions::default()).await.unwrap();

    assert_eq!(first.body, "<p>spec</p>");
    assert_eq!(first.status, 200);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_force_always_hits_network() {
    let server = MockServer::start().await;
    serve(&server, "/spec", "fresh", 2).await;
    let fetcher = HttpFetcher::new(5_000);
    let url = format!("{}/spec", server.uri());
    let force = FetchOptions::default().with_refresh(Refresh::Force);

    fetcher.fetch(&url, &force).await.unwrap();
    fetcher.fetch(&url, &force).await.unwrap();
}

#[tokio::test]
async fn test_error_status_is_a_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let fetcher = HttpFetcher::new(5_000);

    let err = fetcher
        .fetch(&format!("{}/gone", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_network());
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_final_url_follows_http_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/TR/dom"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/TR/2024/dom/", server.uri())),
        )
        .mount(&server)
        .await;
    serve(&server, "/TR/2024/dom/", "dom", 1).await;
    let fetcher = HttpFetcher::new(5_000);

    let result = fetcher
        .fetch(&format!("{}/TR/dom", server.uri()), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.final_url, format!("{}/TR/2024/dom/", server.uri()));
    assert_eq!(result.body, "dom");
}

#[tokio::test]
async fn test_cache_folder_survives_fetcher_instances() {
    let server = MockServer::start().await;
    serve(&server, "/spec", "stored", 1).await;
    let dir = TempDir::new().unwrap();
    let url = format!("{}/spec", server.uri());
    let options = FetchOptions {
        cache_folder: Some(dir.path().to_path_buf()),
        ..FetchOptions::default()
    };

    let first = HttpFetcher::new(5_000).fetch(&url, &options).await.unwrap();

    // A new run with `never` is served from disk.
    let never = options.clone().with_refresh(Refresh::Never);
    let second = HttpFetcher::new(5_000).fetch(&url, &never).await.unwrap();

    assert_eq!(first, second);
    assert!(std::fs::read_dir(dir.path()).unwrap().count() >= 2);
}

#[tokio::test]
async fn test_max_age_refetches_stale_entries() {
    let server = MockServer::start().await;
    serve(&server, "/spec", "v", 2).await;
    let dir = TempDir::new().unwrap();
    let url = format!("{}/spec", server.uri());
    let options = FetchOptions {
        cache_folder: Some(dir.path().to_path_buf()),
        ..FetchOptions::default()
    };

    HttpFetcher::new(5_000).fetch(&url, &options).await.unwrap();

    // Anything stored is at least zero seconds old.
    let stale = options.clone().with_refresh(Refresh::MaxAge(0));
    HttpFetcher::new(5_000).fetch(&url, &stale).await.unwrap();

    let fresh = options.with_refresh(Refresh::MaxAge(3_600));
    HttpFetcher::new(5_000).fetch(&url, &fresh).await.unwrap();
}

#[tokio::test]
async fn test_reset_cache_applies_once_per_run() {
    let server = MockServer::start().await;
    serve(&server, "/spec", "v", 2).await;
    let dir = TempDir::new().unwrap();
    let url = format!("{}/spec", server.uri());
    let seeded = FetchOptions {
        cache_folder: Some(dir.path().to_path_buf()),
        ..FetchOptions::default()
    };
    HttpFetcher::new(5_000).fetch(&url, &seeded).await.unwrap();

    let reset = FetchOptions {
        reset_cache: Some(true),
        refresh: Some(Refresh::Never),
        ..seeded
    };
    let fetcher = HttpFetcher::new(5_000);
    // The wiped store misses once; afterwards the run's own entry is reused.
    fetcher.fetch(&url, &reset).await.unwrap();
    fetcher.fetch(&url, &reset).await.unwrap();
}
