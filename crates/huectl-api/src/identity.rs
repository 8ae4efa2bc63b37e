// Bridge identity and credentials.
//
// `BridgeIdentity` comes out of discovery; `Credentials` out of linking.
// Both are plain values handed to the session when it is opened.

use std::fmt;
use std::net::IpAddr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Where a bridge lives and which certificate it is known by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeIdentity {
    /// Bridge id, lowercase hex (e.g. `001788fffe6a1b2c`). Doubles as the
    /// TLS server name.
    pub id: String,
    /// LAN address the socket actually connects to.
    pub ip_address: IpAddr,
    /// Pinned SHA-256 fingerprint for legacy self-signed certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_fingerprint: Option<String>,
}

impl BridgeIdentity {
    pub fn new(id: impl AsRef<str>, ip_address: IpAddr) -> Self {
        Self {
            id: id.as_ref().trim().to_ascii_lowercase(),
            ip_address,
            cert_fingerprint: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.cert_fingerprint = fingerprint;
        self
    }
}

impl fmt::Display for BridgeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.ip_address)
    }
}

/// Application key minted by the bridge during linking.
///
/// Held as a [`SecretString`] so it never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct Credentials {
    application_key: SecretString,
}

impl Credentials {
    pub fn new(application_key: impl Into<String>) -> Self {
        Self {
            application_key: SecretString::from(application_key.into()),
        }
    }

    pub fn application_key(&self) -> &SecretString {
        &self.application_key
    }

    pub(crate) fn expose(&self) -> &str {
        self.application_key.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("application_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identity_normalizes_id() {
        let identity = BridgeIdentity::new(" 001788FFFE6A1B2C ", "192.168.1.20".parse().unwrap());
        assert_eq!(identity.id, "001788fffe6a1b2c");
        assert!(identity.cert_fingerprint.is_none());
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("super-secret-key");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret-key"));
        assert_eq!(creds.expose(), "super-secret-key");
    }
}
