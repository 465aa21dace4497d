// simbridge-api: Async Rust client for the trading-simulator gateway
// (REST + WebSocket command channel + SSE push stream)

pub mod auth;
pub mod error;
pub mod rest;
pub mod sse;
pub mod transport;
pub mod wire;
pub mod ws;

pub use auth::{SessionToken, TokenManager};
pub use error::Error;
pub use rest::RestClient;
pub use transport::{TlsMode, TransportConfig};

use url::Url;

/// Relative-join base URLs must end with `/` or the last path segment is
/// replaced instead of extended.
pub(crate) fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
