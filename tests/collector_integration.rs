//! Integration tests for paginated locator discovery.

use std::time::Duration;

use harvester_core::{CollectError, UrlCollector};
use serde_json::{Value, json};
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn works(urls: &[Option<&str>]) -> Value {
    let results: Vec<Value> = urls
        .iter()
        .map(|url| json!({"best_oa_location": {"pdf_url": url}}))
        .collect();
    json!({ "results": results })
}

async fn mount_page(server: &MockServer, page: u32, body: Value, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/works"))
        .and(query_param("page", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn collector() -> UrlCollector {
    UrlCollector::new(Duration::from_secs(5), Duration::ZERO).expect("collector builds")
}

fn template(server: &MockServer) -> String {
    format!("{}/works?page={{page}}", server.uri())
}

#[tokio::test]
async fn test_collect_walks_pages_until_target() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        works(&[Some("https://a.org/1.pdf"), Some("https://a.org/2.pdf")]),
        1,
    )
    .await;
    mount_page(
        &server,
        2,
        works(&[Some("https://a.org/3.pdf"), Some("https://a.org/4.pdf")]),
        1,
    )
    .await;
    mount_page(&server, 3, works(&[Some("https://a.org/5.pdf")]), 0).await;

    let candidates = collector().collect(&template(&server), 3).await.unwrap();

    let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://a.org/1.pdf", "https://a.org/2.pdf", "https://a.org/3.pdf"]
    );
    assert_eq!(candidates[2].page, 2);
}

#[tokio::test]
async fn test_collect_target_met_at_page_end_fetches_no_further_page() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        works(&[Some("https://a.org/1.pdf"), Some("https://a.org/2.pdf")]),
        1,
    )
    .await;
    mount_page(&server, 2, works(&[Some("https://a.org/3.pdf")]), 0).await;

    let candidates = collector().collect(&template(&server), 2).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().all(|c| c.page == 1));
}

#[tokio::test]
async fn test_collect_stops_on_page_without_new_locators() {
    let server = MockServer::start().await;
    mount_page(&server, 1, works(&[Some("https://a.org/1.pdf"), None]), 1).await;
    // Only repeats and missing locators: discovery ends here.
    mount_page(&server, 2, works(&[Some("https://a.org/1.pdf"), None]), 1).await;
    mount_page(&server, 3, works(&[Some("https://a.org/9.pdf")]), 0).await;

    let candidates = collector().collect(&template(&server), 100).await.unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].url, "https://a.org/1.pdf");
}

#[tokio::test]
async fn test_collect_skips_empty_locators() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        works(&[Some(""), Some("   "), Some("https://a.org/1.pdf")]),
        1,
    )
    .await;
    // Blank locators alone count as nothing new.
    mount_page(&server, 2, works(&[Some("")]), 1).await;

    let candidates = collector().collect(&template(&server), 100).await.unwrap();

    let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(urls, vec!["https://a.org/1.pdf"]);
}

#[tokio::test]
async fn test_collect_deduplicates_within_and_across_pages() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        1,
        works(&[
            Some("https://a.org/1.pdf"),
            Some("https://a.org/1.pdf"),
            Some("https://a.org/2.pdf"),
        ]),
        1,
    )
    .await;
    mount_page(
        &server,
        2,
        works(&[Some("https://a.org/2.pdf"), Some("https://a.org/3.pdf")]),
        1,
    )
    .await;
    mount_page(&server, 3, works(&[]), 1).await;

    let candidates = collector().collect(&template(&server), 100).await.unwrap();

    let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://a.org/1.pdf", "https://a.org/2.pdf", "https://a.org/3.pdf"]
    );
}

#[tokio::test]
async fn test_collect_sends_tool_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_regex("user-agent", "^PDF-harvester/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(works(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let candidates = collector().collect(&template(&server), 10).await.unwrap();
    assert!(candidates.is_empty());
}

// ==================== Error Tests ====================

#[tokio::test]
async fn test_collect_http_error_aborts() {
    let server = MockServer::start().await;
    mount_page(&server, 1, works(&[Some("https://a.org/1.pdf")]), 1).await;
    Mock::given(method("GET"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = collector().collect(&template(&server), 10).await.unwrap_err();

    assert!(matches!(err, CollectError::Status { status: 503, .. }), "got: {err:?}");
}

#[tokio::test]
async fn test_collect_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = collector().collect(&template(&server), 10).await.unwrap_err();

    assert!(matches!(err, CollectError::Decode { .. }), "got: {err:?}");
}
