// ── Core error types ──
//
// User-facing errors from simbridge-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<simbridge_api::Error>` impl translates transport-layer
// errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to gateway at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Gateway connection is down")]
    NotConnected,

    #[error("Reconnection suspended for another {remaining_secs}s")]
    Suspended { remaining_secs: u64 },

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Client has been disposed")]
    Disposed,

    // ── Channel errors ───────────────────────────────────────────────
    #[error("Push stream requires a connected command channel")]
    PushRequiresCommand,

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// The gateway-specific error code (e.g., "BAD_SYMBOL").
        code: Option<String>,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True when the error means the session is gone. Recovery never
    /// continues past one of these; the engine resets instead.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
            || matches!(
                self,
                Self::Api {
                    status: Some(401),
                    ..
                }
            )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<simbridge_api::Error> for CoreError {
    fn from(err: simbridge_api::Error) -> Self {
        match err {
            simbridge_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            simbridge_api::Error::SessionExpired => CoreError::AuthenticationFailed {
                message: "Session expired -- re-authentication required".into(),
            },
            simbridge_api::Error::NotAuthenticated => CoreError::AuthenticationFailed {
                message: "No active session".into(),
            },
            simbridge_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            simbridge_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            simbridge_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            simbridge_api::Error::Api {
                message,
                code,
                status,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            simbridge_api::Error::ChannelConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("Command channel connect failed: {reason}"),
            },
            simbridge_api::Error::ChannelClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("Command channel closed (code {code}): {reason}"),
            },
            simbridge_api::Error::StreamConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("Push stream connect failed: {reason}"),
            },
            simbridge_api::Error::StreamInterrupted(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("Push stream interrupted: {reason}"),
            },
            simbridge_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
