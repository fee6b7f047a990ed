// End-to-end coordinator tests against a wiremock hub.

use std::time::Duration;

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use livisi_core::{CoreError, HubConfig, HubCoordinator, HubEvent, Topic};

// ── Helpers ─────────────────────────────────────────────────────────

fn config_for(server: &MockServer) -> HubConfig {
    HubConfig {
        host: "127.0.0.1".into(),
        password: SecretString::from("secret".to_owned()),
        service_port: server.address().port(),
        request_timeout: Duration::from_secs(2),
        // Background polling off: the tests drive refreshes explicitly.
        poll_interval: Duration::ZERO,
        websocket_enabled: false,
    }
}

async fn mount_handshake(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": "token-1" })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "serialNumber": "SHC-1",
            "controllerType": "Avatar",
            "operationStatus": "active"
        })))
        .mount(server)
        .await;
}

/// Mount a pending low-battery message for device d1.
async fn mount_messages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "type": "DeviceLowBattery",
            "devices": ["/device/d1"],
            "timestamp": "2024-01-01T00:00:00Z"
        }])))
        .mount(server)
        .await;
}

/// Mount a full healthy inventory: one window sensor with a room and
/// one controller. Messages are mounted per test.
async fn mount_inventory(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "shc1",
                "type": "SHCA",
                "config": {"name": "Controller"}
            },
            {
                "id": "d1",
                "type": "WDS",
                "config": {"name": "Front Door"},
                "location": "/location/r1",
                "tags": {"typeCategory": "TCWindowDoorSensor"}
            }
        ])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/capability"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "c1",
            "device": "/device/d1",
            "type": "WindowDoorSensor"
        }])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/location"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "r1",
            "config": {"name": "Hallway"}
        }])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/device/shc1/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cpuUsage": {"value": 12}
        })))
        .mount(server)
        .await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_refresh_assembles_devices() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;
    mount_messages(&server).await;
    mount_inventory(&server).await;

    let coordinator = HubCoordinator::connect(config_for(&server))
        .await
        .expect("connect");

    let devices = coordinator.get_devices().await.expect("refresh");

    assert_eq!(devices.len(), 2);
    let sensor = devices.iter().find(|d| d.id == "d1").expect("sensor");
    assert_eq!(sensor.capability_id("WindowDoorSensor"), Some("c1"));
    assert_eq!(sensor.room.as_deref(), Some("Hallway"));
    assert!(sensor.battery_low);
    assert!(!sensor.unreachable);

    let controller = devices.iter().find(|d| d.id == "shc1").expect("controller");
    assert!(controller.is_controller());
    assert!(controller.state.is_some());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn failed_poll_marks_known_devices_unreachable() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;

    // First refresh succeeds...
    Mock::given(method("GET"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_inventory(&server).await;
    // ...the second fails at the message fetch.
    Mock::given(method("GET"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let coordinator = HubCoordinator::connect(config_for(&server))
        .await
        .expect("connect");

    let first = coordinator.get_devices().await.expect("first refresh");
    assert_eq!(first.len(), 2);

    let mut reachability = coordinator.subscribe(Topic::Reachability {
        device_id: "d1".into(),
    });

    let result = coordinator.get_devices().await;
    assert!(
        matches!(result, Err(CoreError::UpdateFailed(_))),
        "failed poll must surface as UpdateFailed"
    );

    // The failure fanned out reachability-false for the known device.
    let event = reachability.recv().await.expect("reachability event");
    assert_eq!(
        event,
        HubEvent::ReachabilityChanged {
            device_id: "d1".into(),
            reachable: false,
        }
    );

    // The previous snapshot is still intact -- no partial list replaced it.
    assert_eq!(coordinator.devices().len(), 2);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn successful_poll_fans_out_reachability_per_device() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;
    mount_messages(&server).await;
    mount_inventory(&server).await;

    let coordinator = HubCoordinator::connect(config_for(&server))
        .await
        .expect("connect");

    let mut reachability = coordinator.subscribe(Topic::Reachability {
        device_id: "d1".into(),
    });

    coordinator.get_devices().await.expect("refresh");

    let event = reachability.recv().await.expect("reachability event");
    assert_eq!(
        event,
        HubEvent::ReachabilityChanged {
            device_id: "d1".into(),
            reachable: true,
        }
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn capability_state_failures_are_isolated() {
    let server = MockServer::start().await;
    mount_handshake(&server).await;

    Mock::given(method("GET"))
        .and(path("/capability/c-good/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "onState": {"value": true}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/capability/c-bad/state"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let coordinator = HubCoordinator::connect(config_for(&server))
        .await
        .expect("connect");

    // The failing capability yields None; the sibling still resolves.
    assert_eq!(coordinator.get_capability_state("c-bad").await, None);
    assert_eq!(
        coordinator.get_capability_value("c-good", "onState").await,
        Some(json!(true))
    );

    coordinator.shutdown().await;
}

#[tokio::test]
async fn non_active_hub_status_fails_the_poll() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "access_token": "token-1" })),
        )
        .mount(&server)
        .await;
    // Handshake sees an active hub; by the time the poll runs the hub
    // has started updating itself.
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "controllerType": "Avatar",
            "operationStatus": "active"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "controllerType": "Avatar",
            "operationStatus": "shutting down"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    mount_inventory(&server).await;

    let coordinator = HubCoordinator::connect(config_for(&server))
        .await
        .expect("connect");

    let result = coordinator.get_devices().await;
    assert!(matches!(result, Err(CoreError::UpdateFailed(_))));

    coordinator.shutdown().await;
}
