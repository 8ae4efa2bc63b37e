#![allow(clippy::unwrap_used)]
// Integration tests for `Bridge` against a wiremock CLIP v2 bridge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use huectl_core::{
    Bridge, BridgeConfig, BridgeIdentity, BridgeStorage, CoreError, MemoryStorage, ResourceType,
    StorageKey, StreamState,
};
use huectl_api::BridgeSession;

// ── Fixtures ────────────────────────────────────────────────────────

fn light(id: &str, name: &str, on: bool) -> Value {
    json!({
        "id": id,
        "type": "light",
        "metadata": { "name": name, "archetype": "classic_bulb" },
        "on": { "on": on },
        "dimming": { "brightness": 60.0 },
        "color_temperature": {
            "mirek": 300,
            "mirek_valid": true,
            "mirek_schema": { "mirek_minimum": 153, "mirek_maximum": 500 }
        }
    })
}

fn envelope(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "errors": [], "data": data }))
}

async fn mount_list(server: &MockServer, rtype: &str, data: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/clip/v2/resource/{rtype}")))
        .respond_with(envelope(data))
        .mount(server)
        .await;
}

async fn mount_resources(server: &MockServer) {
    mount_list(
        server,
        "light",
        json!([light("l1", "Desk", true), light("l2", "Shelf", false)]),
    )
    .await;
    mount_list(
        server,
        "grouped_light",
        json!([{ "id": "gl1", "type": "grouped_light", "on": { "on": true } }]),
    )
    .await;
    mount_list(
        server,
        "room",
        json!([{
            "id": "r1",
            "type": "room",
            "metadata": { "name": "Living", "archetype": "living_room" },
            "children": [],
            "services": [{ "rid": "gl1", "rtype": "grouped_light" }]
        }]),
    )
    .await;
    mount_list(server, "zone", json!([])).await;
    mount_list(
        server,
        "scene",
        json!([{
            "id": "s1",
            "type": "scene",
            "metadata": { "name": "Relax" },
            "group": { "rid": "r1", "rtype": "room" }
        }]),
    )
    .await;
}

async fn setup(event_stream: bool) -> (MockServer, Bridge) {
    let server = MockServer::start().await;
    mount_resources(&server).await;
    let bridge = connect(&server, event_stream).await;
    (server, bridge)
}

async fn connect(server: &MockServer, event_stream: bool) -> Bridge {
    let session = BridgeSession::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    let identity = BridgeIdentity::new("001788fffe6a1b2c", "127.0.0.1".parse().unwrap());
    let config = BridgeConfig {
        event_stream,
        ..BridgeConfig::default()
    };
    Bridge::from_session(identity, session, config).await.unwrap()
}

async fn mount_put(server: &MockServer, rtype: &str, id: &str, response: ResponseTemplate) {
    Mock::given(method("PUT"))
        .and(path(format!("/clip/v2/resource/{rtype}/{id}")))
        .respond_with(response)
        .mount(server)
        .await;
}

fn accepted(id: &str, rtype: &str) -> ResponseTemplate {
    envelope(json!([{ "rid": id, "rtype": rtype }]))
}

async fn wait_closed(bridge: &Bridge) -> String {
    let mut rx = bridge.stream_state();
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| matches!(s, StreamState::Closed { .. })),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    let StreamState::Closed { reason } = state else {
        unreachable!()
    };
    reason
}

// ── Loading ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_loads_every_collection() {
    let (_server, bridge) = setup(false).await;
    let cache = bridge.cache();

    assert_eq!(cache.len(ResourceType::Light), 2);
    assert_eq!(cache.len(ResourceType::GroupedLight), 1);
    assert_eq!(cache.len(ResourceType::Room), 1);
    assert_eq!(cache.len(ResourceType::Zone), 0);
    assert_eq!(cache.len(ResourceType::Scene), 1);
    assert_eq!(*bridge.stream_state().borrow(), StreamState::Disabled);
}

#[tokio::test]
async fn test_connect_stored_needs_a_complete_pairing() {
    let storage = Arc::new(MemoryStorage::new());
    let err = Bridge::connect_stored(BridgeConfig::default(), storage.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoBridgeConfigured), "{err:?}");

    // Found during discovery but never linked.
    storage.set(StorageKey::BridgeId, "001788fffe6a1b2c").unwrap();
    storage.set(StorageKey::BridgeIpAddress, "127.0.0.1").unwrap();
    let err = Bridge::connect_stored(BridgeConfig::default(), storage)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoBridgeConfigured), "{err:?}");
}

#[tokio::test]
async fn test_connect_fails_when_a_collection_fails() {
    let server = MockServer::start().await;
    mount_list(&server, "light", json!([])).await;
    mount_list(&server, "grouped_light", json!([])).await;
    mount_list(&server, "room", json!([])).await;
    mount_list(&server, "zone", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/clip/v2/resource/scene"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "errors": [{ "description": "service unavailable" }],
            "data": []
        })))
        .mount(&server)
        .await;

    let session = BridgeSession::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    let identity = BridgeIdentity::new("001788fffe6a1b2c", "127.0.0.1".parse().unwrap());
    let err = Bridge::from_session(identity, session, BridgeConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Rejected { .. }));
}

#[tokio::test]
async fn test_find_by_name_and_grouped_light() {
    let (_server, bridge) = setup(false).await;

    let desk = bridge.find(ResourceType::Light, "desk").unwrap();
    assert_eq!(desk.id(), "l1");
    assert_eq!(
        bridge.grouped_light_of(ResourceType::Room, "Living").unwrap(),
        "gl1"
    );
    assert!(matches!(
        bridge.find(ResourceType::Scene, "Party"),
        Err(CoreError::ResourceNotFound { .. })
    ));
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_execute_success_keeps_optimistic_state() {
    let (server, bridge) = setup(false).await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l1"))
        .and(body_partial_json(json!({ "on": { "on": false } })))
        .respond_with(accepted("l1", "light"))
        .expect(1)
        .mount(&server)
        .await;

    bridge.set_light_on("l1", false).await.unwrap();
    assert!(!bridge.cache().light("l1").unwrap().on.on);
}

#[tokio::test]
async fn test_rejected_command_rolls_back() {
    let (server, bridge) = setup(false).await;
    mount_put(
        &server,
        "light",
        "l1",
        ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "description": "device (light) has communication issues" }],
            "data": []
        })),
    )
    .await;

    let err = bridge.set_light_on("l1", false).await.unwrap_err();
    assert!(
        matches!(err, CoreError::Rejected { ref message } if message.contains("communication issues"))
    );
    assert!(bridge.cache().light("l1").unwrap().on.on);
}

#[tokio::test]
async fn test_overlapping_rejections_restore_cached_state() {
    let (server, bridge) = setup(false).await;
    mount_put(
        &server,
        "light",
        "l1",
        ResponseTemplate::new(200)
            .set_delay(Duration::from_millis(100))
            .set_body_json(json!({
                "errors": [{ "description": "device (light) has communication issues" }],
                "data": []
            })),
    )
    .await;

    let (first, second) = tokio::join!(
        bridge.set_light_brightness("l1", 70.0),
        bridge.set_light_brightness("l1", 80.0),
    );
    assert!(first.is_err());
    assert!(second.is_err());
    assert_eq!(bridge.cache().light("l1").unwrap().brightness(), Some(60.0));
}

#[tokio::test]
async fn test_toggle_uses_cached_state() {
    let (server, bridge) = setup(false).await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l2"))
        .and(body_partial_json(json!({ "on": { "on": true } })))
        .respond_with(accepted("l2", "light"))
        .expect(1)
        .mount(&server)
        .await;

    assert!(bridge.toggle_light("l2").await.unwrap());
    assert!(bridge.cache().light("l2").unwrap().on.on);
}

#[tokio::test]
async fn test_brightness_step_from_cache() {
    let (server, bridge) = setup(false).await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l1"))
        .and(body_partial_json(json!({ "dimming": { "brightness": 70.0 } })))
        .respond_with(accepted("l1", "light"))
        .expect(1)
        .mount(&server)
        .await;

    let next = bridge
        .step_light_brightness("l1", huectl_core::Step::Up)
        .await
        .unwrap();
    assert!((next - 70.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_turn_off_all_lights_targets_lit_lights() {
    let (server, bridge) = setup(false).await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l1"))
        .respond_with(accepted("l1", "light"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l2"))
        .respond_with(accepted("l2", "light"))
        .expect(0)
        .mount(&server)
        .await;

    assert_eq!(bridge.turn_off_all_lights().await.unwrap(), 1);
    assert!(bridge.cache().lights().iter().all(|l| !l.on.on));
}

#[tokio::test]
async fn test_recall_scene() {
    let (server, bridge) = setup(false).await;
    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/scene/s1"))
        .and(body_partial_json(json!({ "recall": { "action": "active" } })))
        .respond_with(accepted("s1", "scene"))
        .expect(1)
        .mount(&server)
        .await;

    bridge.recall_scene("s1").await.unwrap();
}

#[tokio::test]
async fn test_commands_fail_after_disconnect() {
    let (_server, bridge) = setup(false).await;
    bridge.disconnect().await;

    let err = bridge.set_light_on("l1", false).await.unwrap_err();
    assert!(matches!(err, CoreError::SessionClosed));
}

// ── Event stream ────────────────────────────────────────────────────

async fn mount_events(server: &MockServer) {
    let body = concat!(
        ": hi\n\n",
        "id: 1:0\n",
        "data: [{\"id\":\"e1\",\"type\":\"update\",\"data\":[{\"id\":\"l1\",\"type\":\"light\",\"on\":{\"on\":false},\"dimming\":{\"brightness\":25.0}}]}]\n\n",
        "id: 2:0\n",
        "data: [{\"id\":\"e2\",\"type\":\"delete\",\"data\":[{\"id\":\"s1\",\"type\":\"scene\"}]}]\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/eventstream/clip/v2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_events_update_cache_then_stream_closes() {
    let server = MockServer::start().await;
    mount_resources(&server).await;
    mount_events(&server).await;

    let bridge = connect(&server, true).await;
    let reason = wait_closed(&bridge).await;
    assert_eq!(reason, "event stream ended");

    let cache = bridge.cache();
    let desk = cache.light("l1").unwrap();
    assert!(!desk.on.on);
    assert_eq!(desk.brightness(), Some(25.0));
    assert_eq!(desk.metadata.name, "Desk", "untouched fields survive the merge");
    assert!(cache.scene("s1").is_none());
    assert!(cache.last_event_at().is_some());
}

#[tokio::test]
async fn test_resume_events_refetches_snapshot() {
    let server = MockServer::start().await;
    mount_resources(&server).await;
    mount_events(&server).await;

    let bridge = connect(&server, true).await;
    wait_closed(&bridge).await;
    assert!(bridge.cache().scene("s1").is_none());

    bridge.resume_events().await.unwrap();
    let light_fetches = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/clip/v2/resource/light")
        .count();
    assert_eq!(light_fetches, 2);
}

#[tokio::test]
async fn test_resume_after_disconnect_is_refused() {
    let (_server, bridge) = setup(false).await;
    bridge.disconnect().await;
    assert!(matches!(
        bridge.resume_events().await,
        Err(CoreError::SessionClosed)
    ));
}
