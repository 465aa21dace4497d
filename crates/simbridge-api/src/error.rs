use thiserror::Error;

/// Top-level error type for the `simbridge-api` crate.
///
/// Covers every failure mode across the gateway surfaces: session
/// authentication, HTTP transport, the REST API, the WebSocket command
/// channel, and the SSE push stream. `simbridge-core` maps these into its
/// own error type and decides which ones count toward recovery accounting.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed (wrong credentials, account disabled, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Session token expired or was revoked by the gateway.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    /// An operation that needs a session was called without one.
    #[error("Not authenticated -- call login first")]
    NotAuthenticated,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// Structured error from the gateway REST API.
    #[error("Gateway API error (HTTP {status}): {message}")]
    Api {
        message: String,
        code: Option<String>,
        status: u16,
    },

    // ── Command channel ─────────────────────────────────────────────
    /// WebSocket handshake or connection failed.
    #[error("Command channel connect failed: {0}")]
    ChannelConnect(String),

    /// The command channel closed with a close frame.
    #[error("Command channel closed (code {code}): {reason}")]
    ChannelClosed { code: u16, reason: String },

    // ── Push stream ─────────────────────────────────────────────────
    /// SSE stream connect failed (non-2xx or wrong content type).
    #[error("Push stream connect failed: {0}")]
    StreamConnect(String),

    /// SSE stream ended or errored mid-read.
    #[error("Push stream interrupted: {0}")]
    StreamInterrupted(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the session is gone
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::SessionExpired | Self::NotAuthenticated
        ) || matches!(self, Self::Api { status: 401, .. })
    }

    /// Returns `true` if this is a transient failure worth retrying.
    ///
    /// Transient failures feed the recovery engine's failure counter;
    /// everything else is surfaced to the caller as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::ChannelConnect(_)
            | Self::ChannelClosed { .. }
            | Self::StreamConnect(_)
            | Self::StreamInterrupted(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Extract the gateway error code, if the API supplied one.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
