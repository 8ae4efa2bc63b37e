use thiserror::Error;

/// Top-level error type for the `huectl-api` crate.
///
/// Covers every failure mode of talking to a bridge: trust negotiation,
/// transport, the CLIP v2 envelope, linking, and discovery.
/// `huectl-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Trust ───────────────────────────────────────────────────────
    /// The presented certificate does not identify the expected bridge.
    #[error(transparent)]
    Trust(#[from] TrustError),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, reset, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No TLS handshake with the bridge completed in time.
    #[error("Bridge did not complete a handshake within {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// TLS configuration error (bad root store, client build failure).
    #[error("TLS error: {0}")]
    Tls(String),

    /// The session was torn down while the request was in flight.
    #[error("Bridge session closed")]
    SessionClosed,

    // ── Bridge API ──────────────────────────────────────────────────
    /// Non-empty `errors` array in a CLIP v2 response.
    #[error("Bridge API error: {message}")]
    BridgeApi { message: String },

    /// HTML error page served instead of JSON.
    #[error("Bridge error (HTTP {status}): {message}")]
    BridgeHtml { status: u16, message: String },

    /// Linking attempted before the physical link button was pressed.
    #[error("Link button not pressed")]
    LinkButtonNotPressed,

    /// The application key cannot be sent as a header value.
    #[error("Invalid application key")]
    InvalidApplicationKey,

    // ── Discovery ───────────────────────────────────────────────────
    /// Public or local discovery failed outright.
    #[error("Bridge discovery failed: {0}")]
    Discovery(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::ConnectionTimeout { .. } | Self::LinkButtonNotPressed => true,
            _ => false,
        }
    }

    /// Returns `true` if the bridge certificate was refused.
    pub fn is_trust_failure(&self) -> bool {
        matches!(self, Self::Trust(_))
    }

    /// Returns `true` if the bridge reported a missing resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::BridgeHtml { status: 404, .. } => true,
            Self::BridgeApi { message } => message.contains("not found"),
            _ => false,
        }
    }
}

/// Reasons the trust validator refuses a bridge certificate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrustError {
    /// A legacy self-signed certificate whose fingerprint differs from the pin.
    #[error(
        "certificate for bridge {bridge_id} does not match the pinned fingerprint \
         (pinned {expected}, presented {presented}); unlink and relink the bridge \
         to trust the new certificate"
    )]
    IdentityMismatch {
        bridge_id: String,
        expected: String,
        presented: String,
    },

    /// Issuer/subject names fit neither the modern nor the legacy shape.
    #[error("unrecognized certificate topology (issuer CN {issuer:?}, subject CN {subject:?})")]
    UnrecognizedCertificateTopology {
        issuer: Option<String>,
        subject: Option<String>,
    },

    /// Chain verification against the bridge root failed, or the DER is unreadable.
    #[error("certificate rejected: {0}")]
    InvalidCertificate(String),

    /// The root certificate store could not be built.
    #[error("trust store error: {0}")]
    RootStore(String),
}
