//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use simbridge_config::ConfigError;
use simbridge_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REJECTED: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to gateway at {url}")]
    #[diagnostic(
        code(simbridge::connection_failed),
        help(
            "Check that the gateway is running and reachable.\n\
             URL: {url}\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Gateway connection is down")]
    #[diagnostic(
        code(simbridge::not_connected),
        help("The command channel dropped and has not recovered. Re-run the command.")
    )]
    NotConnected,

    #[error("Reconnection suspended for another {remaining_secs}s")]
    #[diagnostic(
        code(simbridge::suspended),
        help(
            "The circuit breaker tripped after repeated connection failures.\n\
             Wait out the cooldown, or check the gateway and try again."
        )
    )]
    Suspended { remaining_secs: u64 },

    #[error("Recovery gave up after {attempts} attempts")]
    #[diagnostic(
        code(simbridge::recovery_exhausted),
        help("Check the gateway, then re-run: simbridge watch")
    )]
    RecoveryExhausted { attempts: u32 },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(simbridge::auth_failed),
        help(
            "Verify the username and password for this profile.\n\
             Set SIMBRIDGE_PASSWORD or the profile's password_env variable."
        )
    )]
    AuthFailed { message: String },

    #[error("Session ended by the gateway: {reason}")]
    #[diagnostic(
        code(simbridge::session_ended),
        help("The session was expired or revoked server-side. Re-run to log in again.")
    )]
    SessionEnded { reason: String },

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(simbridge::no_credentials),
        help(
            "Set SIMBRIDGE_PASSWORD, or point the profile's password_env\n\
             at an environment variable that is set."
        )
    )]
    NoCredentials { profile: String },

    // ── Orders ───────────────────────────────────────────────────────

    #[error("Order rejected: {reason}")]
    #[diagnostic(code(simbridge::order_rejected))]
    OrderRejected { reason: String },

    // ── API ──────────────────────────────────────────────────────────

    #[error("Gateway API error: {message}")]
    #[diagnostic(code(simbridge::api_error))]
    Api {
        message: String,
        code: Option<String>,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(simbridge::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(simbridge::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(simbridge::no_config),
        help(
            "Pass --gateway and --username, or create a config file.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(simbridge::config))]
    Config(Box<figment::Error>),

    // ── Timeout / IO ─────────────────────────────────────────────────

    #[error("Gateway request timed out")]
    #[diagnostic(
        code(simbridge::timeout),
        help("Increase --timeout or check gateway responsiveness.")
    )]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. }
            | Self::NotConnected
            | Self::Suspended { .. }
            | Self::RecoveryExhausted { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::SessionEnded { .. } | Self::NoCredentials { .. } => {
                exit_code::AUTH
            }
            Self::OrderRejected { .. } => exit_code::REJECTED,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },

            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },

            CoreError::NotConnected => Self::NotConnected,

            CoreError::Suspended { remaining_secs } => Self::Suspended { remaining_secs },

            CoreError::Timeout => Self::Timeout,

            CoreError::Disposed => Self::Api {
                message: "client already disposed".into(),
                code: None,
            },

            CoreError::PushRequiresCommand => Self::Api {
                message: "push stream requires a connected command channel".into(),
                code: None,
            },

            CoreError::Api { message, code, .. } => Self::Api { message, code },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::InvalidUrl(e) => Self::Validation {
                field: "gateway".into(),
                reason: e.to_string(),
            },

            CoreError::Internal(message) => Self::Api {
                message,
                code: Some("internal".into()),
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => {
                Self::ProfileNotFound { name, available }
            }
            ConfigError::Figment(e) => Self::Config(e),
        }
    }
}
