//! Tests for the X API v2 client against a mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xlytics::config::{Config, RetryConfig};
use xlytics::{DownloadStatus, FetchRequest, Pipeline, PostSource, SourceError, TwitterClient};

fn test_config(server: &MockServer) -> Config {
    Config {
        api_base_url: server.uri(),
        ..Config::for_testing()
    }
}

fn tweets(range: std::ops::RangeInclusive<u32>) -> Vec<Value> {
    range
        .map(|i| json!({"id": i.to_string(), "text": format!("tweet {i}")}))
        .collect()
}

#[tokio::test]
async fn test_search_sends_auth_and_joins_includes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/recent"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("query", "rust lang"))
        .and(query_param("max_results", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "id": "1", "text": "hello", "author_id": "u1",
                "attachments": {"media_keys": ["3_1"]}
            }],
            "includes": {
                "media": [{"media_key": "3_1", "type": "photo", "url": "https://pbs.twimg.com/media/a.jpg"}],
                "users": [{"id": "u1", "username": "alice"}]
            },
            "meta": {"result_count": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    let posts = client.search("rust lang", 5).await.unwrap();

    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].data["id"], "1");
    assert_eq!(posts[0].media.len(), 1);
    assert_eq!(posts[0].author.as_ref().unwrap()["username"], "alice");
}

#[tokio::test]
async fn test_search_follows_next_token_until_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/recent"))
        .and(query_param_is_missing("next_token"))
        .and(query_param("max_results", "15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": tweets(1..=10),
            "meta": {"result_count": 10, "next_token": "page2"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/recent"))
        .and(query_param("next_token", "page2"))
        .and(query_param("max_results", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": tweets(11..=20),
            "meta": {"result_count": 10, "next_token": "page3"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    let posts = client.search("rust", 15).await.unwrap();

    let ids: Vec<&str> = posts.iter().map(|p| p.data["id"].as_str().unwrap()).collect();
    let expected: Vec<String> = (1..=15).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_search_stops_on_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/search/recent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"result_count": 0}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    assert!(client.search("nothing", 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "title": "Unauthorized", "status": 401
        })))
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    let err = client.search("rust", 10).await.unwrap_err();
    assert!(matches!(err, SourceError::Auth { status: 401, .. }));
}

#[tokio::test]
async fn test_rate_limit_fails_fast_without_sleep() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("x-rate-limit-reset", "0"))
        .expect(1)
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    let err = client.fetch("1").await.unwrap_err();
    assert!(matches!(err, SourceError::RateLimited { .. }));
}

#[tokio::test]
async fn test_rate_limit_retried_when_sleeping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/42"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"id": "42", "text": "finally"}
        })))
        .mount(&server)
        .await;

    let config = Config {
        sleep_on_rate_limit: true,
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..test_config(&server)
    };
    let client = TwitterClient::new(&config).unwrap();
    let posts = client.fetch("42").await.unwrap();

    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].data["text"], "finally");
}

#[tokio::test]
async fn test_fetch_missing_post_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/tweets/404"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{
                "value": "404",
                "detail": "Could not find tweet with id: [404].",
                "title": "Not Found Error",
                "type": "https://api.twitter.com/2/problems/resource-not-found"
            }]
        })))
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    let err = client.fetch("404").await.unwrap_err();
    assert!(matches!(err, SourceError::NotFound(ref id) if id == "404"));
}

#[tokio::test]
async fn test_server_error_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("over capacity"))
        .mount(&server)
        .await;

    let client = TwitterClient::new(&test_config(&server)).unwrap();
    let err = client.fetch("1").await.unwrap_err();
    match err {
        SourceError::Api { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "over capacity");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_end_to_end_lookup_through_api_client() {
    let server = MockServer::start().await;
    let media_url = format!("{}/media/video.mp4", server.uri());
    Mock::given(method("GET"))
        .and(path("/2/tweets/777"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": "777", "text": "clip", "author_id": "u9",
                "attachments": {"media_keys": ["7_1"]},
                "entities": {"hashtags": [{"tag": "clip"}]}
            },
            "includes": {
                "media": [{
                    "media_key": "7_1", "type": "video",
                    "variants": [
                        {"content_type": "application/x-mpegURL", "url": "https://video.twimg.com/pl.m3u8"},
                        {"content_type": "video/mp4", "bit_rate": 832000, "url": media_url}
                    ]
                }],
                "users": [{"id": "u9", "username": "bob"}]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/media/video.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"mp4data".to_vec(), "video/mp4"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = Config {
        output_dir: dir.path().to_path_buf(),
        ..test_config(&server)
    };
    let client = TwitterClient::new(&config).unwrap();
    let pipeline = Pipeline::new(Arc::new(client), config.pipeline_options()).unwrap();

    let result = pipeline
        .run(FetchRequest::lookup("https://twitter.com/bob/status/777"))
        .await
        .unwrap();

    assert_eq!(result.media_succeeded, 1);
    let post = &result.posts[0];
    assert_eq!(post.entities.hashtags, vec!["clip"]);
    assert_eq!(post.author.as_ref().unwrap().username, "bob");
    assert_eq!(post.media[0].status, DownloadStatus::Success);
    assert_eq!(
        std::fs::read(dir.path().join("media/777_0.mp4")).unwrap(),
        b"mp4data"
    );
}
