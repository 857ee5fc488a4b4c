//! HTTP adapter tests against a mock entity proxy

use std::time::Duration;

use assert_matches::assert_matches;
use garage_sync::client::sync::ReachabilityProbe;
use garage_sync::client::{HttpEntityApi, HttpProbe, RemoteEntityApi};
use garage_sync::shared::SyncError;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::fields;

#[tokio::test]
async fn test_get_entity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entities/job/J-1"))
        .and(header("authorization", "Bearer shop-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"field5": "入庫済み", "price": 1000})))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpEntityApi::new(server.uri(), Some("shop-token".to_string()));
    let entity = api.get_entity("job", "J-1").await.unwrap();
    assert_eq!(entity, fields(&[("field5", json!("入庫済み")), ("price", json!(1000))]));
}

#[tokio::test]
async fn test_update_entity_sends_changes() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/entities/work_order/W-3"))
        .and(body_json(json!({"changes": {"labor_hours": 1.5}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"labor_hours": 1.5, "status": "open"})))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpEntityApi::new(format!("{}/", server.uri()), None);
    let updated = api
        .update_entity("work_order", "W-3", &fields(&[("labor_hours", json!(1.5))]))
        .await
        .unwrap();
    assert_eq!(updated["status"], json!("open"));
}

#[tokio::test]
async fn test_entity_id_stays_one_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entities/job/2024%2F0042"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"memo": "slashed id"})))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpEntityApi::new(server.uri(), None);
    let entity = api.get_entity("job", "2024/0042").await.unwrap();
    assert_eq!(entity["memo"], json!("slashed id"));
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let api = HttpEntityApi::new(server.uri(), None);
    let error = api.get_entity("job", "J-1").await.unwrap_err();
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_unprocessable_entity_is_validation() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"field": "price", "message": "must be positive"})),
        )
        .mount(&server)
        .await;

    let api = HttpEntityApi::new(server.uri(), None);
    let error = api
        .update_entity("job", "J-1", &fields(&[("price", json!(-1))]))
        .await
        .unwrap_err();
    assert_matches!(error, SyncError::Validation { field: Some(ref f), .. } if f == "price");
}

#[tokio::test]
async fn test_unparseable_body_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let api = HttpEntityApi::new(server.uri(), None);
    assert!(api.get_entity("job", "J-1").await.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let api = HttpEntityApi::new("http://127.0.0.1:9", None);
    assert!(api.get_entity("job", "J-1").await.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_http_probe() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let timeout = Duration::from_secs(2);
    let healthy = HttpProbe::new(format!("{}/health", server.uri()), timeout).unwrap();
    let failing = HttpProbe::new(format!("{}/down", server.uri()), timeout).unwrap();
    let unreachable = HttpProbe::new("http://127.0.0.1:9/health", timeout).unwrap();

    assert!(healthy.probe().await);
    assert!(!failing.probe().await);
    assert!(!unreachable.probe().await);
}
