//! Integration tests for `TelegramCollector` against a mocked gateway.

use std::collections::HashSet;

use chanwatch_core::Source;
use chanwatch_sources::{CollectError, SourceCollector, TelegramCollector};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn collector(base_url: &str) -> TelegramCollector {
    TelegramCollector::new(base_url, 30).expect("client construction should not fail")
}

#[tokio::test]
async fn fetch_new_items_maps_gateway_posts() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "posts": [
            {
                "id": 101,
                "date": "2026-02-20T10:00:00Z",
                "text": "Морнинг ньюс",
                "views": 15000,
                "replies": 12
            },
            {
                "id": 100,
                "date": "2026-02-19T09:00:00Z",
                "text": "",
                "views": 9000,
                "replies": 0
            }
        ]
    });

    Mock::given(method("GET"))
        .and(path("/channels/durov/posts"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let posts = collector(&server.uri())
        .fetch_new_items("@durov", 2)
        .await
        .expect("should parse posts");

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].id, "101");
    assert_eq!(posts[0].source, Source::Telegram);
    assert_eq!(posts[0].channel, "@durov");
    assert_eq!(posts[0].comment_count, Some(12));
    assert_eq!(posts[1].title, "[Media without text]");
}

#[tokio::test]
async fn fetch_new_comments_skips_known_ids_and_empty_texts() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "comments": [
            {
                "id": 7,
                "date": "2026-02-20T11:00:00Z",
                "text": "первый",
                "sender": { "id": 1, "username": "alice", "first_name": "Alice" }
            },
            {
                "id": 8,
                "date": "2026-02-20T11:05:00Z",
                "text": "",
                "sender": { "id": 2 }
            },
            {
                "id": 9,
                "date": "2026-02-20T11:10:00Z",
                "text": "второй",
                "sender": { "id": 3, "first_name": "Carol" }
            }
        ]
    });

    Mock::given(method("GET"))
        .and(path("/channels/durov/posts/101/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let c = collector(&server.uri());
    let posts = vec![chanwatch_core::Post {
        id: "101".to_string(),
        source: Source::Telegram,
        channel: "@durov".to_string(),
        published_at: "2026-02-20T10:00:00Z".parse().unwrap(),
        title: "post".to_string(),
        comment_count: Some(3),
        views: None,
    }];

    let known: HashSet<String> = HashSet::from(["7".to_string()]);
    let comments = c
        .fetch_new_comments(&posts[0], &known)
        .await
        .expect("should parse comments");

    assert_eq!(comments.len(), 1, "known id and empty text are skipped");
    assert_eq!(comments[0].id, "9");
    assert_eq!(comments[0].author.display_name.as_deref(), Some("Carol"));
    assert!(!comments[0].is_reply);
    assert_eq!(comments[0].likes, 0);
}

#[tokio::test]
async fn flood_wait_maps_to_rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/channels/durov/posts"))
        .respond_with(ResponseTemplate::new(429).set_body_string("FLOOD_WAIT_30"))
        .mount(&server)
        .await;

    let err = collector(&server.uri())
        .fetch_new_items("durov", 10)
        .await
        .expect_err("429 must be an error");

    assert!(matches!(err, CollectError::RateLimited(_)), "got: {err:?}");
    assert!(err.is_throughput_limit());
}

#[tokio::test]
async fn server_error_maps_to_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/channels/durov/posts"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = collector(&server.uri())
        .fetch_new_items("durov", 10)
        .await
        .expect_err("502 must be an error");

    assert!(matches!(err, CollectError::Api(_)), "got: {err:?}");
    assert!(!err.is_throughput_limit());
}
