// Bridge session: the one authenticated connection to a bridge.
//
// Wraps `reqwest::Client` with CLIP v2 URL construction and envelope
// unwrapping. Endpoint methods live in `clip.rs` and the event stream in
// `eventstream.rs`; this module only handles transport mechanics.
//
// A session is cheap to clone. All clones share the HTTP/2 connection and
// one cancellation token, so `close()` ends every in-flight request and the
// event stream together.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::Error;
use crate::identity::{BridgeIdentity, Credentials};
use crate::transport::TransportConfig;
use crate::trust::{FingerprintStore, TrustValidator};

/// Header carrying the application key on every request.
pub const APPLICATION_KEY_HEADER: &str = "hue-application-key";

const CLIP_PREFIX: &str = "clip/v2/";
const EVENT_STREAM_PATH: &str = "eventstream/clip/v2";
/// Cheap authenticated resource used to prove the session works.
const HANDSHAKE_PATH: &str = "resource/bridge";

// ── Envelope ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Deserialize)]
struct ApiErrorEntry {
    description: String,
}

// ── Session ──────────────────────────────────────────────────────────

/// An open, authenticated session with one bridge.
#[derive(Clone)]
pub struct BridgeSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    http: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("base_url", &self.inner.base_url.as_str())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl BridgeSession {
    // ── Constructors ─────────────────────────────────────────────────

    /// Connect to a bridge and prove the credentials.
    ///
    /// The TLS handshake is verified by a [`TrustValidator`] for
    /// `identity.id`; a legacy certificate seen for the first time is pinned
    /// through `pins`. Fails with [`Error::ConnectionTimeout`] if the bridge
    /// has not answered within `transport.connect_timeout`, or with
    /// [`Error::Trust`] carrying the validator's reason.
    pub async fn open(
        identity: &BridgeIdentity,
        credentials: &Credentials,
        transport: &TransportConfig,
        pins: Arc<dyn FingerprintStore>,
    ) -> Result<Self, Error> {
        let validator = Arc::new(TrustValidator::new(&identity.id, &transport.root_ca, pins)?);

        let mut headers = HeaderMap::new();
        let mut key_value =
            HeaderValue::from_str(credentials.expose()).map_err(|_| Error::InvalidApplicationKey)?;
        key_value.set_sensitive(true);
        headers.insert(APPLICATION_KEY_HEADER, key_value);

        let http = transport.build_client(identity, Arc::clone(&validator), headers)?;
        let base_url = transport.bridge_url(identity, "")?;
        let session = Self::with_parts(http, base_url, transport.request_timeout);

        debug!(bridge = %identity, "opening bridge session");
        let first_call = session.request(Method::GET, HANDSHAKE_PATH, None);
        match tokio::time::timeout(transport.connect_timeout, first_call).await {
            Err(_) => Err(Error::ConnectionTimeout {
                timeout_ms: transport.connect_timeout_ms(),
            }),
            Ok(Err(Error::Transport(e))) => Err(match validator.take_rejection() {
                Some(reason) => Error::Trust(reason),
                None if e.is_timeout() => Error::ConnectionTimeout {
                    timeout_ms: transport.connect_timeout_ms(),
                },
                None => Error::Transport(e),
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) => {
                info!(bridge_id = %identity.id, "bridge session open");
                Ok(session)
            }
        }
    }

    /// Wrap an existing `reqwest::Client` (caller manages TLS and auth headers).
    ///
    /// `base_url` is the bridge root, e.g. `https://001788fffe6a1b2c/`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self::with_parts(
            http,
            base_url,
            TransportConfig::default().request_timeout,
        ))
    }

    fn with_parts(http: reqwest::Client, base_url: Url, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                http,
                base_url,
                request_timeout,
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Tear down the session: in-flight requests fail with
    /// [`Error::SessionClosed`] and the event stream ends.
    pub fn close(&self) {
        if !self.inner.cancel.is_cancelled() {
            debug!("closing bridge session");
            self.inner.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/clip/v2/{path}`
    pub(crate) fn clip_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self
            .inner
            .base_url
            .join(CLIP_PREFIX)?
            .join(path.trim_start_matches('/'))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Issue one request/response exchange and unwrap the CLIP envelope.
    ///
    /// Returns the `data` array on success.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Vec<Value>, Error> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let url = self.clip_url(path)?;
        debug!("{method} {url}");

        let mut builder = self
            .inner
            .http
            .request(method, url)
            .timeout(self.inner.request_timeout);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let exchange = async {
            let resp = builder.send().await?;
            let status = resp.status();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let text = resp.text().await?;
            interpret_response(status, content_type.as_deref(), &text)
        };

        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(Error::SessionClosed),
            result = exchange => result,
        }
    }

    /// [`request`](Self::request) with each `data` element deserialized as `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Vec<T>, Error> {
        self.request(method, path, body)
            .await?
            .into_iter()
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| Error::Deserialization {
                    message: e.to_string(),
                    body: value.to_string(),
                })
            })
            .collect()
    }

    /// Start the long-lived event stream request.
    pub(crate) async fn open_event_stream(&self) -> Result<reqwest::Response, Error> {
        let url = self.inner.base_url.join(EVENT_STREAM_PATH)?;
        debug!("GET {url} (stream)");

        let resp = self
            .inner
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let text = resp.text().await?;
        match interpret_response(status, content_type.as_deref(), &text) {
            Err(e) => Err(e),
            Ok(_) => Err(Error::BridgeApi {
                message: format!("event stream refused (HTTP {status})"),
            }),
        }
    }
}

// ── Response interpretation ──────────────────────────────────────────

/// Map a raw response onto the CLIP v2 result.
///
/// HTML error pages (served on non-200 by some firmware) become
/// [`Error::BridgeHtml`]; a non-empty `errors` array becomes
/// [`Error::BridgeApi`] with the descriptions joined by `", "`.
pub fn interpret_response(
    status: StatusCode,
    content_type: Option<&str>,
    body: &str,
) -> Result<Vec<Value>, Error> {
    if status != StatusCode::OK && content_type.is_some_and(|ct| ct.starts_with("text/html")) {
        let message = html_error_message(body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_owned()
        });
        return Err(Error::BridgeHtml {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: Envelope = serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (HTTP {status}, body preview: {preview:?})"),
            body: body.to_owned(),
        }
    })?;

    if !envelope.errors.is_empty() {
        let message = envelope
            .errors
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(Error::BridgeApi { message });
    }

    Ok(envelope.data)
}

fn html_error_message(body: &str) -> Option<String> {
    const OPEN: &str = r#"<div class="error">"#;
    let start = body.find(OPEN)? + OPEN.len();
    let len = body[start..].find("</div>")?;
    let message = body[start..start + len].trim();
    (!message.is_empty()).then(|| message.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_array_is_returned() {
        let body = json!({ "errors": [], "data": [{ "id": "a" }, { "id": "b" }] }).to_string();
        let data = interpret_response(StatusCode::OK, Some("application/json"), &body).unwrap();
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn errors_are_joined() {
        let body = json!({
            "errors": [
                { "description": "unauthorized user" },
                { "description": "resource not available" }
            ],
            "data": []
        })
        .to_string();
        let err = interpret_response(StatusCode::FORBIDDEN, Some("application/json"), &body)
            .unwrap_err();
        match err {
            Error::BridgeApi { message } => {
                assert_eq!(message, "unauthorized user, resource not available");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn html_error_page_is_extracted() {
        let body = r#"<html><body><div class="error">Too many requests</div></body></html>"#;
        let err = interpret_response(
            StatusCode::SERVICE_UNAVAILABLE,
            Some("text/html; charset=utf-8"),
            body,
        )
        .unwrap_err();
        match err {
            Error::BridgeHtml { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "Too many requests");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn html_without_marker_uses_status_text() {
        let err = interpret_response(StatusCode::NOT_FOUND, Some("text/html"), "<html></html>")
            .unwrap_err();
        assert!(matches!(err, Error::BridgeHtml { status: 404, ref message } if message == "Not Found"));
    }

    #[test]
    fn garbage_is_a_deserialization_error() {
        let err = interpret_response(StatusCode::OK, Some("application/json"), "nope").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn clip_urls_are_rooted_under_prefix() {
        let session =
            BridgeSession::from_reqwest("https://001788fffe6a1b2c", reqwest::Client::new()).unwrap();
        assert_eq!(
            session.clip_url("resource/light/abc").unwrap().as_str(),
            "https://001788fffe6a1b2c/clip/v2/resource/light/abc"
        );
    }

    #[tokio::test]
    async fn closed_session_rejects_requests() {
        let session =
            BridgeSession::from_reqwest("https://001788fffe6a1b2c", reqwest::Client::new()).unwrap();
        session.close();
        let err = session
            .request(Method::GET, "resource/light", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }
}
