mod common;

use common::{dead_url, inbound, new_endpoint, spawn_receiver, test_app};
use webhook_fanout::{
    Direction, FanoutError, LogQuery, PageQuery, ProcessingStatus, Storage,
};

#[tokio::test]
async fn primary_response_is_mirrored_to_the_caller() {
    let app = test_app();
    let (primary_url, _) = spawn_receiver(201, "primary-ack").await;
    let (secondary_url, _) = spawn_receiver(200, "ok-b").await;
    app.registry
        .create(new_endpoint(&primary_url, true))
        .await
        .unwrap();
    app.registry
        .create(new_endpoint(&secondary_url, false))
        .await
        .unwrap();

    let response = app
        .receiver
        .receive(inbound("POST", Some(r#"{"x":1}"#)))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body, "primary-ack");
    assert_eq!(
        response.headers.get("x-relay-test").map(String::as_str),
        Some("1")
    );

    let records = app.storage.list_inbound(PageQuery::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.processing_status, ProcessingStatus::Completed);
    assert_eq!(record.response_status, Some(201));
    assert_eq!(record.response_body.as_deref(), Some("primary-ack"));

    let logs = app
        .storage
        .list_logs(LogQuery {
            webhook_id: Some(record.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    let outgoing = logs
        .iter()
        .filter(|l| l.direction == Direction::Outgoing)
        .count();
    let incoming = logs
        .iter()
        .filter(|l| l.direction == Direction::Incoming)
        .count();
    assert_eq!(outgoing, 2);
    assert_eq!(incoming, 1);
}

#[tokio::test]
async fn generic_ack_when_no_primary_is_configured() {
    let app = test_app();
    let (url_a, _) = spawn_receiver(200, "ok-a").await;
    let (url_b, _) = spawn_receiver(200, "ok-b").await;
    app.registry.create(new_endpoint(&url_a, false)).await.unwrap();
    app.registry.create(new_endpoint(&url_b, false)).await.unwrap();

    let response = app.receiver.receive(inbound("POST", Some("{}"))).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.contains("Webhook processed successfully"));

    let records = app.storage.list_inbound(PageQuery::default()).await.unwrap();
    assert_eq!(records[0].processing_status, ProcessingStatus::Completed);
    assert_eq!(records[0].response_status, Some(200));
}

#[tokio::test]
async fn secondary_success_completes_despite_failed_primary() {
    let app = test_app();
    let gone = dead_url().await;
    let (secondary_url, _) = spawn_receiver(200, "ok").await;
    app.registry.create(new_endpoint(&gone, true)).await.unwrap();
    app.registry
        .create(new_endpoint(&secondary_url, false))
        .await
        .unwrap();

    let response = app.receiver.receive(inbound("POST", Some("{}"))).await.unwrap();

    // The primary's failure is not exposed to the sender.
    assert_eq!(response.status, 200);
    assert!(response.body.contains("Webhook processed successfully"));

    let records = app.storage.list_inbound(PageQuery::default()).await.unwrap();
    assert_eq!(records[0].processing_status, ProcessingStatus::Completed);
    assert_eq!(records[0].response_status, Some(200));
}

#[tokio::test]
async fn all_failures_mark_the_record_failed() {
    let app = test_app();
    app.registry
        .create(new_endpoint(&dead_url().await, true))
        .await
        .unwrap();
    app.registry
        .create(new_endpoint(&dead_url().await, false))
        .await
        .unwrap();

    let response = app.receiver.receive(inbound("POST", Some("{}"))).await.unwrap();
    assert_eq!(response.status, 200);

    let records = app.storage.list_inbound(PageQuery::default()).await.unwrap();
    let record = &records[0];
    assert_eq!(record.processing_status, ProcessingStatus::Failed);
    // Bookkeeping comes from the targeted primary's transport failure.
    assert_eq!(record.response_status, Some(0));
}

#[tokio::test]
async fn no_active_endpoints_is_a_configuration_error() {
    let app = test_app();

    let err = app
        .receiver
        .receive(inbound("POST", Some(r#"{"x":1}"#)))
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::NoActiveEndpoints));

    // The inbound record still exists, marked failed, with no outgoing rows.
    let records = app.storage.list_inbound(PageQuery::default()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].processing_status, ProcessingStatus::Failed);

    let logs = app.storage.list_logs(LogQuery::default()).await.unwrap();
    assert!(logs.iter().all(|l| l.direction == Direction::Incoming));
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn deactivated_endpoints_are_not_targeted() {
    let app = test_app();
    let (url, recorded) = spawn_receiver(200, "ok").await;
    let created = app.registry.create(new_endpoint(&url, false)).await.unwrap();
    app.registry
        .update(
            created.id,
            webhook_fanout::EndpointPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = app.receiver.receive(inbound("POST", None)).await.unwrap_err();
    assert!(matches!(err, FanoutError::NoActiveEndpoints));
    assert!(recorded.lock().await.is_empty());
}
