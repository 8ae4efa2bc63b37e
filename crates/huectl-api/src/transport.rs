// Shared transport configuration for building the bridge HTTP client.
//
// Every request and the event stream ride one pooled HTTP/2 connection.
// Certificates are checked by the bridge trust validator, and the bridge id
// is resolved to its LAN address so the TLS server name is the id rather
// than a raw IP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use url::Url;

use crate::error::Error;
use crate::identity::BridgeIdentity;
use crate::trust::{RootCa, TrustValidator};

/// HTTPS port of the bridge API.
pub const DEFAULT_BRIDGE_PORT: u16 = 443;

/// Handshake budget before a connection attempt is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

const USER_AGENT: &str = concat!("huectl/", env!("CARGO_PKG_VERSION"));

/// Shared transport configuration for building bridge clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub root_ca: RootCa,
    /// Port the bridge serves HTTPS on.
    pub port: u16,
    pub connect_timeout: Duration,
    /// Per-request budget for request/response calls. The event stream is
    /// exempt.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            root_ca: RootCa::Bundled,
            port: DEFAULT_BRIDGE_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Timeout in whole milliseconds, for error reporting.
    pub fn connect_timeout_ms(&self) -> u64 {
        u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// `https://{bridge id}[:port]/{path}`. The host is the bridge id so it
    /// doubles as the TLS server name; [`build_client`](Self::build_client)
    /// resolves it to the LAN address.
    pub fn bridge_url(&self, identity: &BridgeIdentity, path: &str) -> Result<Url, Error> {
        let mut url = Url::parse(&format!("https://{}/", identity.id))?;
        url.set_port(Some(self.port))
            .map_err(|()| Error::Tls(format!("cannot set port {} on {url}", self.port)))?;
        Ok(url.join(path)?)
    }

    /// rustls client config that defers certificate decisions to `validator`.
    pub fn tls_config(validator: Arc<TrustValidator>) -> Result<rustls::ClientConfig, Error> {
        let mut config = rustls::ClientConfig::builder_with_provider(validator.crypto_provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("unsupported protocol versions: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(validator)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }

    /// Build a `reqwest::Client` bound to one bridge.
    ///
    /// `headers` become default headers on every request (the application
    /// key, once linked).
    pub fn build_client(
        &self,
        identity: &BridgeIdentity,
        validator: Arc<TrustValidator>,
        headers: HeaderMap,
    ) -> Result<reqwest::Client, Error> {
        let tls = Self::tls_config(validator)?;

        reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .resolve(
                &identity.id,
                SocketAddr::new(identity.ip_address, self.port),
            )
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(1)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Plain client for talking to the public discovery service.
    pub fn build_discovery_client(&self) -> Result<reqwest::Client, Error> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
