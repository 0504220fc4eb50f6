//! HTTP control API through warp's test harness

use mqtt_publisher::config::{ConfigStore, RunConfig};
use mqtt_publisher::control::{routes, ApiState, RunDispatcher, RUN_ACCEPTED_MESSAGE};
use mqtt_publisher::observability::PublisherMetrics;
use mqtt_publisher::testing::MockConnectionFactory;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use warp::http::StatusCode;

mod test_helpers;
use test_helpers::{mock_coordinator, test_document, test_run_config};

struct Harness {
    _dir: TempDir,
    state: ApiState,
    factory: MockConnectionFactory,
}

async fn harness(persist: bool) -> Harness {
    let dir = tempdir().unwrap();
    let data_path = dir.path().join("data.json");
    std::fs::write(&data_path, test_document().to_string()).unwrap();

    let store = Arc::new(ConfigStore::new(dir.path().join("config.json")));
    if persist {
        store.save(&test_run_config(2, 1)).await.unwrap();
    }

    let factory = MockConnectionFactory::new();
    let metrics = Arc::new(PublisherMetrics::new());
    let dispatcher = RunDispatcher::start(
        Arc::new(mock_coordinator(&factory)),
        1,
        4,
        Arc::clone(&metrics),
    );

    Harness {
        _dir: dir,
        state: ApiState {
            store,
            dispatcher,
            metrics,
            data_path,
        },
        factory,
    }
}

#[tokio::test]
async fn test_get_config_returns_persisted_record() {
    let h = harness(true).await;
    let api = routes(h.state.clone());

    for path in ["/config", "/api", "/api/config"] {
        let response = warp::test::request()
            .method("GET")
            .path(path)
            .reply(&api)
            .await;

        assert_eq!(response.status(), StatusCode::OK, "path {path}");
        let body: RunConfig = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, test_run_config(2, 1));
    }
}

#[tokio::test]
async fn test_get_config_reports_unreadable_file() {
    let h = harness(false).await;
    let api = routes(h.state.clone());

    let response = warp::test::request()
        .method("GET")
        .path("/config")
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8_lossy(response.body());
    assert!(text.starts_with("Error reading config file:"), "{text}");
}

#[tokio::test]
async fn test_post_config_persists_and_queues_a_run() {
    let h = harness(false).await;
    let api = routes(h.state.clone());

    let mut config = test_run_config(3, 1);
    config.topic = "plant/b".to_string();

    let response = warp::test::request()
        .method("POST")
        .path("/config")
        .json(&config)
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], json!("accepted"));
    assert_eq!(body["message"], json!(RUN_ACCEPTED_MESSAGE));
    assert!(body["runId"].is_string());

    assert_eq!(h.state.store.load().await.unwrap(), config);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.state.metrics.snapshot().runs.completed < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.factory.publish_attempts().len(), 3);

    h.state.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_post_accepts_api_alias_and_pascal_case() {
    let h = harness(false).await;
    let api = routes(h.state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/api")
        .json(&json!({
            "Topic": "legacy/topic",
            "MessageCount": 0,
            "IntervalSeconds": 0,
            "MessagePath": "all",
            "Protocol": "TCP",
            "MQTTbrokerAddress": "localhost",
            "ClientCount": 0
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(h.state.store.load().await.unwrap().topic, "legacy/topic");
    h.state.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_post_rejects_malformed_body() {
    let h = harness(true).await;
    let api = routes(h.state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/config")
        .header("content-type", "application/json")
        .body("{\"topic\": 42")
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // persisted record untouched
    assert_eq!(h.state.store.load().await.unwrap(), test_run_config(2, 1));
    h.state.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_post_after_shutdown_is_unavailable() {
    let h = harness(false).await;
    h.state.dispatcher.shutdown().await;
    let api = routes(h.state.clone());

    let response = warp::test::request()
        .method("POST")
        .path("/config")
        .json(&test_run_config(1, 1))
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert!(body["error"].as_str().unwrap().contains("stopped"));
    assert_eq!(h.state.metrics.snapshot().runs.rejected, 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let h = harness(true).await;
    let api = routes(h.state.clone());

    let response = warp::test::request()
        .method("GET")
        .path("/metrics")
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["runs"]["submitted"], json!(0));
    assert!(body["mqtt"]["messages_published"].is_u64());
    h.state.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let h = harness(true).await;
    let api = routes(h.state.clone());

    let response = warp::test::request()
        .method("GET")
        .path("/nope")
        .reply(&api)
        .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    h.state.dispatcher.shutdown().await;
}
