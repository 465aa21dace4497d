// Session lifecycle against the gateway.
//
// Bearer-token auth: login yields an access token with an expiry, refresh
// rotates it, logout invalidates it server-side. The current token lives
// behind a watch channel so the connection layer can react to token loss
// (forced logout) without polling.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::error::Error;

/// How close to expiry a token still counts as valid. Refreshing a few
/// seconds early avoids racing the gateway's clock.
const EXPIRY_SLACK_SECS: i64 = 30;

// ── SessionToken ─────────────────────────────────────────────────────

/// The current authenticated session.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
}

impl SessionToken {
    /// Valid means present and not within the expiry slack window.
    fn is_valid(&self) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_SLACK_SECS) > Utc::now()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    session_id: String,
    expires_in_secs: i64,
}

// ── TokenManager ─────────────────────────────────────────────────────

/// Owns the session token and the REST calls that mint, rotate, and
/// revoke it. Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    http: reqwest::Client,
    base_url: Url,
    session: watch::Sender<Option<SessionToken>>,
}

impl TokenManager {
    pub fn new(base_url: Url, http: reqwest::Client) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            inner: Arc::new(TokenInner {
                http,
                base_url: crate::with_trailing_slash(base_url),
                session,
            }),
        }
    }

    /// Authenticate with username/password. `POST /api/v1/session`.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<(), Error> {
        let url = self.inner.base_url.join("api/v1/session")?;
        debug!(%url, username, "logging in");

        let body = json!({
            "username": username,
            "password": password.expose_secret(),
        });

        let resp = self
            .inner
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("login failed (HTTP {status}): {body}"),
            });
        }

        let session: SessionResponse = resp.json().await.map_err(Error::Transport)?;
        self.store(session);
        debug!("login successful");
        Ok(())
    }

    /// Rotate the access token. `POST /api/v1/session/refresh`.
    ///
    /// A 401 means the session is gone for good: the stored token is
    /// cleared so `is_authenticated` flips and watchers see the logout.
    pub async fn refresh(&self) -> Result<(), Error> {
        let refresh_token = {
            let current = self.inner.session.borrow();
            let token = current.as_ref().ok_or(Error::NotAuthenticated)?;
            token
                .refresh_token
                .as_ref()
                .ok_or(Error::NotAuthenticated)?
                .clone()
        };

        let url = self.inner.base_url.join("api/v1/session/refresh")?;
        debug!(%url, "refreshing session");

        let resp = self
            .inner
            .http
            .post(url)
            .bearer_auth(refresh_token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.clear();
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Authentication {
                message: format!("refresh failed (HTTP {status}): {body}"),
            });
        }

        let session: SessionResponse = resp.json().await.map_err(Error::Transport)?;
        self.store(session);
        debug!("session refreshed");
        Ok(())
    }

    /// End the session server-side and clear it locally. The local clear
    /// happens even if the request fails -- a dead gateway should not pin
    /// a client in a half-logged-in state.
    pub async fn logout(&self) -> Result<(), Error> {
        let token = {
            let current = self.inner.session.borrow();
            current.as_ref().map(|t| t.access_token.clone())
        };
        self.clear();

        let Some(token) = token else { return Ok(()) };

        let url = self.inner.base_url.join("api/v1/session")?;
        debug!(%url, "logging out");

        let _resp = self
            .inner
            .http
            .delete(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(Error::Transport)?;

        debug!("logout complete");
        Ok(())
    }

    /// Whether a non-expired session is held right now.
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .session
            .borrow()
            .as_ref()
            .is_some_and(SessionToken::is_valid)
    }

    /// Current access token, refreshing once if it has gone stale.
    ///
    /// `None` means the caller must treat the session as unauthenticated;
    /// this method never errors because every caller handles both
    /// outcomes the same way.
    pub async fn access_token(&self) -> Option<SecretString> {
        {
            let current = self.inner.session.borrow();
            if let Some(token) = current.as_ref() {
                if token.is_valid() {
                    return Some(token.access_token.clone());
                }
            } else {
                return None;
            }
        }

        match self.refresh().await {
            Ok(()) => self
                .inner
                .session
                .borrow()
                .as_ref()
                .map(|t| t.access_token.clone()),
            Err(e) => {
                debug!(error = %e, "token refresh failed");
                None
            }
        }
    }

    /// Session id of the current session, for keep-alive frames.
    pub fn session_id(&self) -> Option<String> {
        self.inner
            .session
            .borrow()
            .as_ref()
            .map(|t| t.session_id.clone())
    }

    /// Observe session changes: login, refresh, logout, forced clear.
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionToken>> {
        self.inner.session.subscribe()
    }

    /// Drop the local session without a server round-trip.
    pub fn clear(&self) {
        self.inner.session.send_replace(None);
    }

    fn store(&self, resp: SessionResponse) {
        let token = SessionToken {
            access_token: SecretString::from(resp.access_token),
            refresh_token: resp.refresh_token.map(SecretString::from),
            session_id: resp.session_id,
            expires_at: Utc::now() + ChronoDuration::seconds(resp.expires_in_secs),
        };
        self.inner.session.send_replace(Some(token));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        let url = Url::parse("https://gateway.test").expect("static url");
        TokenManager::new(url, reqwest::Client::new())
    }

    fn token(expires_in_secs: i64) -> SessionToken {
        SessionToken {
            access_token: SecretString::from("tok"),
            refresh_token: None,
            session_id: "sess-1".into(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        }
    }

    #[test]
    fn unauthenticated_by_default() {
        let mgr = manager();
        assert!(!mgr.is_authenticated());
        assert!(mgr.session_id().is_none());
    }

    #[test]
    fn expiry_slack_invalidates_near_expiry_tokens() {
        let mgr = manager();
        mgr.inner.session.send_replace(Some(token(3600)));
        assert!(mgr.is_authenticated());

        // Expires inside the slack window -> treated as stale.
        mgr.inner.session.send_replace(Some(token(EXPIRY_SLACK_SECS - 5)));
        assert!(!mgr.is_authenticated());
    }

    #[test]
    fn clear_notifies_watchers() {
        let mgr = manager();
        let mut rx = mgr.subscribe();
        mgr.inner.session.send_replace(Some(token(3600)));
        assert!(rx.has_changed().expect("sender alive"));
        rx.mark_unchanged();

        mgr.clear();
        assert!(rx.has_changed().expect("sender alive"));
        assert!(rx.borrow().is_none());
    }
}
