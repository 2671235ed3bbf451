use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tower::ServiceExt;

use cotek_app::http::{router, HttpState};
use device_cache::{DeviceCache, NullSink};
use poller_actor::{ActorConfig, SerialService, ServiceHandle};
use serial_client::{ClientConfig, SerialConnector};
use types::{SensorName, Target};

fn app() -> (Router, ServiceHandle, DeviceCache) {
    let cache = DeviceCache::new(Arc::new(NullSink));
    let service = SerialService::new(
        SerialConnector::new(ClientConfig::default()),
        cache.clone(),
        ActorConfig::default(),
    );
    let handle = service.handle();
    let metrics = PrometheusBuilder::new().build_recorder().handle();
    let router = router(HttpState {
        service: handle.clone(),
        metrics: Some(metrics),
    });
    (router, handle, cache)
}

async fn call(router: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, body.to_vec())
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[tokio::test]
async fn sensors_list_follows_poll_order() {
    let (router, _, cache) = app();
    cache.update(SensorName::Frequency, Some(50.0));

    let (status, body) = call(router, "GET", "/sensors").await;

    assert_eq!(status, StatusCode::OK);
    let list = json(&body);
    let list = list.as_array().expect("array");
    assert_eq!(list.len(), 15);
    assert_eq!(list[0]["name"], "Inverter_Frequency");
    assert_eq!(list[0]["value"], 50.0);
    assert_eq!(list[0]["validity"], "valid");
    assert_eq!(list[14]["name"], "Inverter_Charger_Status");
}

#[tokio::test]
async fn single_sensor_reports_unavailable() {
    let (router, _, cache) = app();
    cache.update(SensorName::BatteryTemp, None);

    let (status, body) = call(router, "GET", "/sensors/Inverter_Battery_Temp").await;

    assert_eq!(status, StatusCode::OK);
    let reading = json(&body);
    assert_eq!(reading["name"], "Inverter_Battery_Temp");
    assert_eq!(reading["validity"], "unavailable");
}

#[tokio::test]
async fn unknown_names_are_not_found() {
    let (router, _, _) = app();

    let (sensor_status, _) = call(router.clone(), "GET", "/sensors/Inverter_Bogus").await;
    let (state_status, _) = call(router.clone(), "GET", "/states/solar").await;
    let (toggle_status, _) = call(router, "POST", "/states/solar/toggle").await;

    assert_eq!(sensor_status, StatusCode::NOT_FOUND);
    assert_eq!(state_status, StatusCode::NOT_FOUND);
    assert_eq!(toggle_status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn state_reflects_derived_status() {
    let (router, _, cache) = app();
    cache.derive_transition(SensorName::PowerStatus, 1.0);

    let (status, body) = call(router, "GET", "/states/inverter").await;

    assert_eq!(status, StatusCode::OK);
    let state = json(&body);
    assert_eq!(state["target"], "inverter");
    assert_eq!(state["state"], "on");
}

#[tokio::test]
async fn toggle_arms_opposite_command() {
    let (router, handle, cache) = app();
    cache.derive_transition(SensorName::ChargerStatus, 0.0);

    let (status, body) = call(router, "POST", "/states/charger/toggle").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json(&body)["command"], "charger_off");
    assert_eq!(
        handle.pending(Target::Charger).map(|command| command.name()),
        Some("charger_off")
    );
    assert!(handle.pending(Target::Inverter).is_none());
}

#[tokio::test]
async fn status_starts_unavailable() {
    let (router, _, _) = app();

    let (status, body) = call(router, "GET", "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["link"], "unavailable");
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let (router, _, _) = app();

    let (status, _) = call(router, "GET", "/metrics").await;

    assert_eq!(status, StatusCode::OK);
}
