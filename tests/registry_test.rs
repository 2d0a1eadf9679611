mod common;

use common::{new_endpoint, test_app};
use webhook_fanout::{EndpointId, EndpointPatch, FanoutError, NewEndpoint};

#[tokio::test]
async fn create_requires_url() {
    let app = test_app();
    let err = app
        .registry
        .create(NewEndpoint::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::Validation(_)));
    assert!(app.registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn at_most_one_primary_after_any_sequence() {
    let app = test_app();
    let a = app
        .registry
        .create(new_endpoint("http://a.example/hook", true))
        .await
        .unwrap();
    let b = app
        .registry
        .create(new_endpoint("http://b.example/hook", true))
        .await
        .unwrap();

    // Creating B as primary demoted A.
    let endpoints = app.registry.list().await.unwrap();
    assert_eq!(endpoints.iter().filter(|e| e.is_primary).count(), 1);
    assert!(endpoints.iter().find(|e| e.id == b.id).unwrap().is_primary);
    assert!(!endpoints.iter().find(|e| e.id == a.id).unwrap().is_primary);

    // Promoting A via update demotes B again.
    app.registry
        .update(
            a.id,
            EndpointPatch {
                is_primary: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let endpoints = app.registry.list().await.unwrap();
    assert_eq!(endpoints.iter().filter(|e| e.is_primary).count(), 1);
    assert!(endpoints.iter().find(|e| e.id == a.id).unwrap().is_primary);
}

#[tokio::test]
async fn list_is_primary_first_then_insertion_order() {
    let app = test_app();
    let first = app
        .registry
        .create(new_endpoint("http://first.example/hook", false))
        .await
        .unwrap();
    let second = app
        .registry
        .create(new_endpoint("http://second.example/hook", false))
        .await
        .unwrap();
    let primary = app
        .registry
        .create(new_endpoint("http://primary.example/hook", true))
        .await
        .unwrap();

    let ids: Vec<_> = app
        .registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec![primary.id, first.id, second.id]);
}

#[tokio::test]
async fn partial_update_keeps_unset_fields() {
    let app = test_app();
    let mut new = new_endpoint("http://a.example/hook", false);
    new.headers = common::btree(&[("x-token", "secret")]);
    let created = app.registry.create(new).await.unwrap();
    assert!(created.is_active);

    let updated = app
        .registry
        .update(
            created.id,
            EndpointPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.url, created.url);
    assert_eq!(updated.headers, created.headers);
    assert!(!updated.is_active);
    assert!(updated.updated_at >= created.updated_at);

    // Deactivated endpoints drop out of the live fan-out set.
    assert!(app.registry.active_endpoints().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let app = test_app();
    let missing = EndpointId(42);

    let err = app
        .registry
        .update(missing, EndpointPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::NotFound { .. }));

    let err = app.registry.delete(missing).await.unwrap_err();
    assert!(matches!(err, FanoutError::NotFound { .. }));
}

#[tokio::test]
async fn delete_removes_exactly_once() {
    let app = test_app();
    let created = app
        .registry
        .create(new_endpoint("http://a.example/hook", false))
        .await
        .unwrap();

    app.registry.delete(created.id).await.unwrap();
    assert!(app.registry.list().await.unwrap().is_empty());

    let err = app.registry.delete(created.id).await.unwrap_err();
    assert!(matches!(err, FanoutError::NotFound { .. }));
}
