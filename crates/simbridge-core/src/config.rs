// ── Runtime connection configuration ──
//
// These types describe *how* to connect to a gateway. They carry
// credential data and connection tuning, but never touch disk. The CLI
// (via simbridge-config) constructs a `GatewayConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use simbridge_api::TlsMode;

use crate::error::CoreError;
use crate::recovery::RecoveryOptions;

/// Username/password pair for session login.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Configuration for one gateway connection.
///
/// Built by the CLI, passed to `Gateway` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway base URL (e.g., `https://sim.example.com`). The command
    /// channel and push stream URLs are derived from it.
    pub url: Url,
    /// Session credentials.
    pub credentials: Credentials,
    /// TLS verification strategy.
    pub tls: TlsMode,
    /// Request timeout for REST calls.
    pub timeout: Duration,
    /// Heartbeat period on the command channel.
    pub heartbeat_interval: Duration,
    /// Whether to bring up the push stream after the command channel.
    pub push_enabled: bool,
    /// Recovery engine tuning.
    pub recovery: RecoveryOptions,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:8443".parse().unwrap(),
            credentials: Credentials {
                username: "trader".into(),
                password: SecretString::from(String::new()),
            },
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            push_enabled: true,
            recovery: RecoveryOptions::default(),
        }
    }
}

impl GatewayConfig {
    /// WebSocket URL for the command channel.
    pub(crate) fn channel_url(&self) -> Result<Url, CoreError> {
        let mut url = with_trailing_slash(&self.url).join("api/v1/channel")?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|()| CoreError::Config {
            message: format!("cannot derive WebSocket URL from {}", self.url),
        })?;
        Ok(url)
    }

    /// SSE URL for the push stream.
    pub(crate) fn stream_url(&self) -> Result<Url, CoreError> {
        Ok(with_trailing_slash(&self.url).join("api/v1/stream")?)
    }
}

/// `Url::join` replaces the last path segment when the base lacks a
/// trailing slash; normalize so gateway bases behind a subpath work.
fn with_trailing_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }
    let mut url = url.clone();
    url.set_path(&format!("{}/", url.path()));
    url
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config_for(url: &str) -> GatewayConfig {
        GatewayConfig {
            url: url.parse().unwrap(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn channel_url_swaps_scheme() {
        let config = config_for("https://sim.example.com");
        assert_eq!(
            config.channel_url().unwrap().as_str(),
            "wss://sim.example.com/api/v1/channel"
        );

        let config = config_for("http://127.0.0.1:9000");
        assert_eq!(
            config.channel_url().unwrap().as_str(),
            "ws://127.0.0.1:9000/api/v1/channel"
        );
    }

    #[test]
    fn derived_urls_respect_base_subpath() {
        let config = config_for("https://sim.example.com/gateway");
        assert_eq!(
            config.stream_url().unwrap().as_str(),
            "https://sim.example.com/gateway/api/v1/stream"
        );
    }
}
