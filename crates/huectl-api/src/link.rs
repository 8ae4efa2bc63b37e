// Linking: minting an application key.
//
// `POST /api` with a device type while the bridge's link button is pressed.
// The bridge answers with a v1-style array of `{"success": ...}` or
// `{"error": ...}` objects.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::identity::{BridgeIdentity, Credentials};
use crate::transport::TransportConfig;
use crate::trust::{FingerprintStore, TrustValidator};

/// Bridge error type for "link button not pressed".
const LINK_BUTTON_NOT_PRESSED: u16 = 101;

#[derive(Serialize)]
struct LinkRequest<'a> {
    devicetype: &'a str,
    generateclientkey: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum LinkResponse {
    Success(LinkSuccess),
    Error(LinkFailure),
}

#[derive(Deserialize)]
struct LinkSuccess {
    username: String,
}

#[derive(Deserialize)]
struct LinkFailure {
    #[serde(rename = "type")]
    kind: u16,
    description: String,
}

/// Ask the bridge for a new application key.
///
/// The connection is verified by the same trust policy as a session, so a
/// legacy certificate gets pinned here on first contact.
pub async fn create_application_key(
    identity: &BridgeIdentity,
    devicetype: &str,
    transport: &TransportConfig,
    pins: Arc<dyn FingerprintStore>,
) -> Result<Credentials, Error> {
    let validator = Arc::new(TrustValidator::new(&identity.id, &transport.root_ca, pins)?);
    let http = transport.build_client(identity, Arc::clone(&validator), HeaderMap::new())?;
    let url = transport.bridge_url(identity, "api")?;

    let attempt = request_application_key(&http, url, devicetype);
    match tokio::time::timeout(transport.connect_timeout + transport.request_timeout, attempt).await
    {
        Err(_) => Err(Error::ConnectionTimeout {
            timeout_ms: transport.connect_timeout_ms(),
        }),
        Ok(Err(Error::Transport(e))) => Err(validator
            .take_rejection()
            .map_or(Error::Transport(e), Error::Trust)),
        Ok(result) => result,
    }
}

/// The raw link exchange against `url` (normally `https://{bridge}/api`).
pub async fn request_application_key(
    http: &reqwest::Client,
    url: Url,
    devicetype: &str,
) -> Result<Credentials, Error> {
    debug!("POST {url}");
    let body = http
        .post(url)
        .json(&LinkRequest {
            devicetype,
            generateclientkey: true,
        })
        .send()
        .await?
        .text()
        .await?;

    let responses: Vec<LinkResponse> =
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("unexpected link response: {e}"),
            body: body.clone(),
        })?;

    let mut failures = Vec::new();
    for response in responses {
        match response {
            LinkResponse::Success(success) => {
                info!("application key created");
                return Ok(Credentials::new(success.username));
            }
            LinkResponse::Error(failure) if failure.kind == LINK_BUTTON_NOT_PRESSED => {
                return Err(Error::LinkButtonNotPressed);
            }
            LinkResponse::Error(failure) => failures.push(failure.description),
        }
    }

    Err(Error::BridgeApi {
        message: if failures.is_empty() {
            "empty link response".into()
        } else {
            failures.join(", ")
        },
    })
}
