//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use huectl_config::ConfigError;
use huectl_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_PAIRED: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const UNSUPPORTED: i32 = 5;
    pub const UNTRUSTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to the Hue Bridge at {bridge}")]
    #[diagnostic(
        code(huectl::connection_failed),
        help(
            "Check that the bridge is switched on and on the same network.\n\
             Reason: {reason}\n\
             Try: huectl status"
        )
    )]
    ConnectionFailed { bridge: String, reason: String },

    #[error("The Hue Bridge is not trusted")]
    #[diagnostic(
        code(huectl::untrusted),
        help(
            "{message}\n\
             If the bridge was replaced, run: huectl unlink && huectl pair"
        )
    )]
    Untrusted { message: String },

    #[error("Request timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(huectl::timeout),
        help("Increase the timeout with --timeout or check that the bridge is reachable.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("Lost the connection to the bridge")]
    #[diagnostic(code(huectl::session_closed))]
    SessionClosed,

    // ── Pairing ──────────────────────────────────────────────────────
    #[error("Not paired with a Hue Bridge")]
    #[diagnostic(code(huectl::not_paired), help("Run: huectl pair"))]
    NotPaired,

    #[error("Pairing did not complete: {title}")]
    #[diagnostic(code(huectl::pairing_failed), help("{body}"))]
    PairingFailed { title: String, body: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(huectl::not_found),
        help("Run: huectl {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{message}")]
    #[diagnostic(code(huectl::unsupported))]
    Unsupported { message: String },

    // ── Bridge ───────────────────────────────────────────────────────
    #[error("Bridge refused the request: {message}")]
    #[diagnostic(code(huectl::rejected))]
    Rejected { message: String },

    #[error("{message}")]
    #[diagnostic(code(huectl::api))]
    Api { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    #[diagnostic(
        code(huectl::config),
        help("Check {path}")
    )]
    Config { message: String, path: String },

    #[error("Storage error: {message}")]
    #[diagnostic(code(huectl::storage))]
    Storage { message: String },

    // ── Interactive ──────────────────────────────────────────────────
    #[error("'{action}' requires confirmation")]
    #[diagnostic(
        code(huectl::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render output: {0}")]
    Render(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::SessionClosed => exit_code::CONNECTION,
            Self::Untrusted { .. } => exit_code::UNTRUSTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::NotPaired | Self::PairingFailed { .. } => exit_code::NOT_PAIRED,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Unsupported { .. } => exit_code::UNSUPPORTED,
            Self::Config { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { bridge, reason } => Self::ConnectionFailed { bridge, reason },
            CoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CoreError::Untrusted { message } => Self::Untrusted { message },
            CoreError::SessionClosed => Self::SessionClosed,
            CoreError::NoBridgeConfigured => Self::NotPaired,
            CoreError::LinkButtonNotPressed => Self::PairingFailed {
                title: "link button not pressed".into(),
                body: "Press the button in the center of the Hue Bridge, then run huectl pair again."
                    .into(),
            },
            CoreError::ResourceNotFound {
                resource_type,
                identifier,
            } => Self::NotFound {
                list_command: list_command(&resource_type),
                resource_type,
                identifier,
            },
            CoreError::Unsupported { message } => Self::Unsupported { message },
            CoreError::Rejected { message } => Self::Rejected { message },
            CoreError::Config { message } => Self::Config {
                message,
                path: huectl_config::config_path().display().to_string(),
            },
            CoreError::Storage { message } => Self::Storage { message },
            CoreError::InvalidTransition { .. } | CoreError::Internal(_) => {
                Self::Internal(err.to_string())
            }
            CoreError::Discovery { message } | CoreError::Api { message } => Self::Api { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { .. } | ConfigError::Figment(_) => Self::Config {
                message: err.to_string(),
                path: huectl_config::config_path().display().to_string(),
            },
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}

fn list_command(resource_type: &str) -> String {
    match resource_type {
        "room" | "grouped_light" => "rooms list".into(),
        "zone" => "zones list".into(),
        "scene" => "scenes list".into(),
        _ => "lights list".into(),
    }
}
