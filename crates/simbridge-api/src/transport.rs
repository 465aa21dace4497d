// Shared transport configuration for building reqwest::Client instances.
//
// The REST client, the session client, and the SSE push stream all share
// TLS and timeout settings through this module. Auth is bearer-token per
// request, so no cookie jar is involved.

use std::path::PathBuf;
use std::time::Duration;

/// TLS verification mode.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed lab gateways).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("simbridge/", env!("CARGO_PKG_VERSION")));
        self.finish(builder)
    }

    /// Build a client without the request timeout.
    ///
    /// The SSE push stream holds its response open indefinitely; a total
    /// request timeout would kill the stream mid-flight. Connect timeout
    /// still applies.
    pub fn build_streaming_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let builder = reqwest::Client::builder()
            .connect_timeout(self.timeout)
            .user_agent(concat!("simbridge/", env!("CARGO_PKG_VERSION")));
        self.finish(builder)
    }

    fn finish(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::Client, crate::error::Error> {
        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path).map_err(|e| {
                    crate::error::Error::Tls(format!("failed to read CA cert: {e}"))
                })?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| crate::error::Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| crate::error::Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
