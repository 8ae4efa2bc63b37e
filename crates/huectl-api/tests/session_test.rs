#![allow(clippy::unwrap_used)]
// Integration tests for `BridgeSession`, linking, and discovery using wiremock.

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use huectl_api::discovery::discover_remote;
use huectl_api::link::request_application_key;
use huectl_api::models::LightUpdate;
use huectl_api::session::APPLICATION_KEY_HEADER;
use huectl_api::{BridgeSession, Error, EventKind, ResourceType};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, BridgeSession) {
    let server = MockServer::start().await;
    let mut headers = HeaderMap::new();
    headers.insert(APPLICATION_KEY_HEADER, HeaderValue::from_static("test-key"));
    let http = reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .unwrap();
    let session = BridgeSession::from_reqwest(&server.uri(), http).unwrap();
    (server, session)
}

fn light(id: &str, name: &str, on: bool) -> serde_json::Value {
    json!({
        "id": id,
        "type": "light",
        "metadata": { "name": name, "archetype": "classic_bulb" },
        "on": { "on": on },
        "dimming": { "brightness": 60.0 }
    })
}

// ── Resource tests ──────────────────────────────────────────────────

#[tokio::test]
async fn test_get_lights() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/clip/v2/resource/light"))
        .and(header(APPLICATION_KEY_HEADER, "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [],
            "data": [light("l1", "Desk", true), light("l2", "Shelf", false)]
        })))
        .mount(&server)
        .await;

    let lights = session.get_lights().await.unwrap();
    assert_eq!(lights.len(), 2);
    assert_eq!(lights[0].metadata.name, "Desk");
    assert!(!lights[1].on.on);
}

#[tokio::test]
async fn test_list_skips_invalid_resources() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/clip/v2/resource/light"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [],
            "data": [light("l1", "Desk", true), { "id": "broken", "type": "light" }]
        })))
        .mount(&server)
        .await;

    let resources = session.list(ResourceType::Light).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].id(), "l1");
}

#[tokio::test]
async fn test_update_light_sends_body() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/light/l1"))
        .and(body_json(json!({ "on": { "on": false } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [],
            "data": [{ "rid": "l1", "rtype": "light" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ids = session
        .update_light("l1", &LightUpdate::new().on(false))
        .await
        .unwrap();
    assert_eq!(ids[0].rid, "l1");
}

#[tokio::test]
async fn test_recall_scene() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/scene/s1"))
        .and(body_json(json!({ "recall": { "action": "active" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [],
            "data": [{ "rid": "s1", "rtype": "scene" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    session.recall_scene("s1").await.unwrap();
}

#[tokio::test]
async fn test_bridge_errors_are_surfaced() {
    let (server, session) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/clip/v2/resource/grouped_light/g1"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!({
            "errors": [{ "description": "device (grouped_light) is \"soft off\"" }],
            "data": []
        })))
        .mount(&server)
        .await;

    let result = session
        .update_grouped_light("g1", &LightUpdate::new().brightness(20.0))
        .await;
    assert!(
        matches!(result, Err(Error::BridgeApi { .. })),
        "expected BridgeApi error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_html_error_page() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/clip/v2/resource/zone"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("content-type", "text/html")
                .set_body_string(
                    "<html><body><div class=\"error\">Bridge is busy</div></body></html>",
                ),
        )
        .mount(&server)
        .await;

    let result = session.get_zones().await;
    match result {
        Err(Error::BridgeHtml { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "Bridge is busy");
        }
        other => panic!("expected BridgeHtml error, got: {other:?}"),
    }
}

// ── Event stream tests ──────────────────────────────────────────────

#[tokio::test]
async fn test_event_stream_yields_events_then_ends() {
    let (server, session) = setup().await;

    let body = concat!(
        ": hi\n\n",
        "id: 1:0\n",
        "data: [{\"id\":\"e1\",\"type\":\"update\",\"data\":[{\"id\":\"l1\",\"type\":\"light\",\"on\":{\"on\":false}}]}]\n\n",
        "id: 2:0\n",
        "data: [{\"id\":\"e2\",\"type\":\"delete\",\"data\":[{\"id\":\"s9\",\"type\":\"scene\"}]}]\n\n",
    );

    Mock::given(method("GET"))
        .and(path("/eventstream/clip/v2"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let events: Vec<_> = session.events().collect().await;
    assert_eq!(events.len(), 2);

    let first = events[0].as_ref().unwrap();
    assert_eq!(first.kind, EventKind::Update);
    assert_eq!(first.data[0].id(), Some("l1"));

    let second = events[1].as_ref().unwrap();
    assert_eq!(second.kind, EventKind::Delete);
    assert_eq!(second.data[0].resource_type(), Some(ResourceType::Scene));
}

#[tokio::test]
async fn test_event_stream_refused() {
    let (server, session) = setup().await;

    Mock::given(method("GET"))
        .and(path("/eventstream/clip/v2"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "errors": [{ "description": "unauthorized user" }],
            "data": []
        })))
        .mount(&server)
        .await;

    let events: Vec<_> = session.events().collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], Err(Error::BridgeApi { message }) if message == "unauthorized user"));
}

#[tokio::test]
async fn test_closed_session_ends_event_stream() {
    let (_server, session) = setup().await;
    session.close();
    let events: Vec<_> = session.events().collect().await;
    assert!(events.is_empty());
}

// ── Link tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_link_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(body_json(json!({ "devicetype": "huectl#test", "generateclientkey": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "success": { "username": "new-app-key", "clientkey": "ABCDEF" } }
        ])))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/api", server.uri())).unwrap();
    let creds = request_application_key(&reqwest::Client::new(), url, "huectl#test")
        .await
        .unwrap();
    assert!(!format!("{creds:?}").contains("new-app-key"));
}

#[tokio::test]
async fn test_link_button_not_pressed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "error": { "type": 101, "address": "", "description": "link button not pressed" } }
        ])))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/api", server.uri())).unwrap();
    let result = request_application_key(&reqwest::Client::new(), url, "huectl#test").await;
    assert!(
        matches!(result, Err(Error::LinkButtonNotPressed)),
        "expected LinkButtonNotPressed, got: {result:?}"
    );
}

// ── Discovery tests ─────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_service() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "001788FFFE6A1B2C", "internalipaddress": "192.168.1.20", "port": 443 }
        ])))
        .mount(&server)
        .await;

    let found = discover_remote(&reqwest::Client::new(), &format!("{}/", server.uri()))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "001788fffe6a1b2c");
    assert_eq!(found[0].ip_address.to_string(), "192.168.1.20");
}

#[tokio::test]
async fn test_discovery_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let result = discover_remote(&reqwest::Client::new(), &server.uri()).await;
    assert!(matches!(result, Err(Error::Discovery(_))));
}
