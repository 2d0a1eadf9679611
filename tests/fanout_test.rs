mod common;

use common::{btree, dead_url, new_endpoint, spawn_receiver, test_app};
use webhook_fanout::{merge_headers, Direction, LogQuery, Storage, WebhookId};

#[tokio::test]
async fn one_result_and_one_log_row_per_endpoint() {
    let app = test_app();
    let (url_a, _) = spawn_receiver(200, "ok-a").await;
    let (url_b, _) = spawn_receiver(200, "ok-b").await;
    app.registry
        .create(new_endpoint(&url_a, true))
        .await
        .unwrap();
    app.registry
        .create(new_endpoint(&url_b, false))
        .await
        .unwrap();

    let targets = app.registry.active_endpoints().await.unwrap();
    let webhook_id = WebhookId::new();
    let results = app
        .engine
        .fan_out(
            &webhook_id,
            "POST",
            &btree(&[("content-type", "application/json")]),
            Some(r#"{"x":1}"#),
            &targets,
        )
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success && r.status_code == 200));
    assert_eq!(results.iter().filter(|r| r.is_primary).count(), 1);

    let logs = app
        .storage
        .list_logs(LogQuery {
            webhook_id: Some(webhook_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.direction == Direction::Outgoing));

    let mut logged_urls: Vec<_> = logs.iter().filter_map(|l| l.endpoint_url.clone()).collect();
    logged_urls.sort();
    let mut expected = vec![url_a, url_b];
    expected.sort();
    assert_eq!(logged_urls, expected);
}

#[tokio::test]
async fn transport_failure_is_isolated_per_endpoint() {
    let app = test_app();
    let (live_url, _) = spawn_receiver(200, "ok").await;
    let gone = dead_url().await;
    app.registry
        .create(new_endpoint(&live_url, false))
        .await
        .unwrap();
    app.registry
        .create(new_endpoint(&gone, false))
        .await
        .unwrap();

    let targets = app.registry.active_endpoints().await.unwrap();
    let webhook_id = WebhookId::new();
    let results = app
        .engine
        .fan_out(&webhook_id, "POST", &btree(&[]), Some("payload"), &targets)
        .await;

    assert_eq!(results.len(), 2);
    let failed = results.iter().find(|r| !r.success).unwrap();
    assert_eq!(failed.status_code, 0);
    assert_eq!(failed.response_time_ms, 0);
    assert!(failed.response_body.starts_with("Error:"));

    let delivered = results.iter().find(|r| r.success).unwrap();
    assert_eq!(delivered.status_code, 200);
    assert_eq!(delivered.response_body, "ok");

    // Both attempts were logged, failure included.
    let logs = app
        .storage
        .list_logs(LogQuery {
            webhook_id: Some(webhook_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.len(), 2);
    let failed_log = logs
        .iter()
        .find(|l| l.endpoint_url.as_deref() == Some(gone.as_str()))
        .unwrap();
    assert_eq!(failed_log.status_code, Some(0));
    assert_eq!(failed_log.response_time_ms, Some(0));
}

#[tokio::test]
async fn custom_headers_win_and_host_is_not_forwarded() {
    let app = test_app();
    let (url, recorded) = spawn_receiver(200, "ok").await;
    let mut new = new_endpoint(&url, false);
    new.headers = btree(&[("x-token", "endpoint")]);
    app.registry.create(new).await.unwrap();

    let targets = app.registry.active_endpoints().await.unwrap();
    let incoming = btree(&[
        ("host", "sender.example.com"),
        ("x-token", "sender"),
        ("x-keep", "yes"),
    ]);
    app.engine
        .fan_out(&WebhookId::new(), "POST", &incoming, Some("{}"), &targets)
        .await;

    let requests = recorded.lock().await;
    assert_eq!(requests.len(), 1);
    let seen = &requests[0];
    assert_eq!(seen.headers.get("x-token").map(String::as_str), Some("endpoint"));
    assert_eq!(seen.headers.get("x-keep").map(String::as_str), Some("yes"));
    // The stale authority never reaches the destination.
    assert_ne!(
        seen.headers.get("host").map(String::as_str),
        Some("sender.example.com")
    );
}

#[tokio::test]
async fn get_requests_omit_the_body() {
    let app = test_app();
    let (url, recorded) = spawn_receiver(200, "ok").await;
    app.registry.create(new_endpoint(&url, false)).await.unwrap();

    let targets = app.registry.active_endpoints().await.unwrap();
    app.engine
        .fan_out(
            &WebhookId::new(),
            "GET",
            &btree(&[]),
            Some("should-not-be-sent"),
            &targets,
        )
        .await;

    let requests = recorded.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert!(requests[0].body.is_empty());
}

#[test]
fn merge_prefers_custom_headers_and_strips_hop_by_hop() {
    let incoming = btree(&[
        ("Host", "sender.example.com"),
        ("Connection", "keep-alive"),
        ("Transfer-Encoding", "chunked"),
        ("X-Token", "sender"),
        ("Content-Type", "application/json"),
    ]);
    let custom = btree(&[("X-Token", "endpoint"), ("x-extra", "1")]);

    let merged = merge_headers(&incoming, &custom);

    assert_eq!(merged.get("x-token").map(String::as_str), Some("endpoint"));
    assert_eq!(
        merged.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(merged.get("x-extra").map(String::as_str), Some("1"));
    assert!(!merged.contains_key("host"));
    assert!(!merged.contains_key("connection"));
    assert!(!merged.contains_key("transfer-encoding"));
}
