// Bridge discovery
//
// The public discovery service is asked first; if it fails or knows no
// bridge, an SSDP M-SEARCH on the local network is the fallback. Only the
// first bridge found is used.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Error;
use crate::identity::BridgeIdentity;
use crate::transport::TransportConfig;

/// Public discovery service endpoint.
pub const DISCOVERY_ENDPOINT: &str = "https://discovery.meethue.com/";

const SSDP_MULTICAST: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1900);

const M_SEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 2\r\n\
ST: urn:schemas-upnp-org:device:basic:1\r\n\r\n";

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub endpoint: String,
    /// How long to collect SSDP responses.
    pub ssdp_timeout: Duration,
    /// Skip SSDP entirely (e.g. on networks that drop multicast).
    pub ssdp_enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            endpoint: DISCOVERY_ENDPOINT.to_owned(),
            ssdp_timeout: Duration::from_secs(3),
            ssdp_enabled: true,
        }
    }
}

#[derive(Deserialize)]
struct DiscoveryEntry {
    id: String,
    internalipaddress: IpAddr,
}

/// [`discover`] with a client built from `transport`.
pub async fn find_bridge(
    transport: &TransportConfig,
    config: &DiscoveryConfig,
) -> Result<Option<BridgeIdentity>, Error> {
    let http = transport.build_discovery_client()?;
    discover(&http, config).await
}

/// Find one bridge: public service first, SSDP as fallback.
pub async fn discover(
    http: &reqwest::Client,
    config: &DiscoveryConfig,
) -> Result<Option<BridgeIdentity>, Error> {
    match discover_remote(http, &config.endpoint).await {
        Ok(found) if !found.is_empty() => {
            info!(count = found.len(), "bridges found via discovery service");
            return Ok(found.into_iter().next());
        }
        Ok(_) => debug!("discovery service knows no bridges"),
        Err(e) => warn!(error = %e, "discovery service unavailable"),
    }

    if !config.ssdp_enabled {
        return Ok(None);
    }

    let found = discover_ssdp(config.ssdp_timeout).await?;
    if !found.is_empty() {
        info!(count = found.len(), "bridges found via SSDP");
    }
    Ok(found.into_iter().next())
}

/// Query the public discovery service.
pub async fn discover_remote(
    http: &reqwest::Client,
    endpoint: &str,
) -> Result<Vec<BridgeIdentity>, Error> {
    let url = Url::parse(endpoint)?;
    debug!("GET {url}");
    let resp = http.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Discovery(format!(
            "discovery service returned HTTP {status}"
        )));
    }

    let body = resp.text().await?;
    let entries: Vec<DiscoveryEntry> =
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("unexpected discovery response: {e}"),
            body: body.clone(),
        })?;

    Ok(entries
        .into_iter()
        .map(|entry| BridgeIdentity::new(entry.id, entry.internalipaddress))
        .collect())
}

/// Multicast an SSDP search and collect bridge replies until `timeout`.
pub async fn discover_ssdp(timeout: Duration) -> Result<Vec<BridgeIdentity>, Error> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| Error::Discovery(format!("cannot bind SSDP socket: {e}")))?;
    socket
        .send_to(M_SEARCH.as_bytes(), SSDP_MULTICAST)
        .await
        .map_err(|e| Error::Discovery(format!("cannot send SSDP search: {e}")))?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; 2048];
    let mut found: Vec<BridgeIdentity> = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "SSDP receive failed");
                break;
            }
            Ok(Ok((len, from))) => {
                let Some(datagram) = buf.get(..len) else {
                    continue;
                };
                if let Some(bridge) = parse_ssdp_response(datagram, from.ip()) {
                    if !found.iter().any(|b| b.id == bridge.id) {
                        debug!(bridge = %bridge, "SSDP reply");
                        found.push(bridge);
                    }
                }
            }
        }
    }

    Ok(found)
}

/// Extract a bridge from an SSDP reply. Non-Hue devices (no
/// `hue-bridgeid` header) yield `None`.
pub fn parse_ssdp_response(datagram: &[u8], source: IpAddr) -> Option<BridgeIdentity> {
    let text = std::str::from_utf8(datagram).ok()?;

    let mut bridge_id = None;
    let mut location_host = None;
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("hue-bridgeid") {
            bridge_id = Some(value.to_owned());
        } else if name.eq_ignore_ascii_case("location") {
            location_host = Url::parse(value)
                .ok()
                .and_then(|u| u.host_str().and_then(|h| h.parse::<IpAddr>().ok()));
        }
    }

    Some(BridgeIdentity::new(bridge_id?, location_host.unwrap_or(source)))
}
