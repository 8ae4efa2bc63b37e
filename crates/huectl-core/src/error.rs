// ── Core error types ──
//
// User-facing errors from huectl-core. Consumers never see reqwest errors
// or raw CLIP envelopes; the `From<huectl_api::Error>` impl translates
// them into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to bridge {bridge}: {reason}")]
    ConnectionFailed { bridge: String, reason: String },

    #[error("Bridge did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The certificate was refused; carries the validator's explanation.
    #[error("Bridge is not trusted: {message}")]
    Untrusted { message: String },

    #[error("Bridge session closed")]
    SessionClosed,

    #[error("No bridge configured -- run `huectl pair` first")]
    NoBridgeConfigured,

    #[error("Link button not pressed")]
    LinkButtonNotPressed,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{resource_type} not found: {identifier}")]
    ResourceNotFound {
        resource_type: String,
        identifier: String,
    },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation not supported: {message}")]
    Unsupported { message: String },

    #[error("Operation rejected by bridge: {message}")]
    Rejected { message: String },

    #[error("Cannot {event} while {state}")]
    InvalidTransition { state: String, event: String },

    #[error("Bridge discovery failed: {message}")]
    Discovery { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api { message: String },

    // ── Persistence and configuration ────────────────────────────────
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionFailed { .. } | Self::LinkButtonNotPressed
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<huectl_api::Error> for CoreError {
    fn from(err: huectl_api::Error) -> Self {
        match err {
            huectl_api::Error::Trust(e) => CoreError::Untrusted {
                message: e.to_string(),
            },
            huectl_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_ms: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        bridge: e
                            .url()
                            .and_then(|u| u.host_str().map(str::to_owned))
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                    }
                }
            }
            huectl_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            huectl_api::Error::ConnectionTimeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            huectl_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                bridge: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            huectl_api::Error::SessionClosed => CoreError::SessionClosed,
            huectl_api::Error::BridgeApi { message } => CoreError::Rejected { message },
            huectl_api::Error::BridgeHtml { status, message } => CoreError::Rejected {
                message: format!("HTTP {status}: {message}"),
            },
            huectl_api::Error::LinkButtonNotPressed => CoreError::LinkButtonNotPressed,
            huectl_api::Error::InvalidApplicationKey => CoreError::Config {
                message: "Application key contains characters not allowed in a header".into(),
            },
            huectl_api::Error::Discovery(message) => CoreError::Discovery { message },
            huectl_api::Error::Deserialization { message, body: _ } => {
                CoreError::Api { message }
            }
        }
    }
}
