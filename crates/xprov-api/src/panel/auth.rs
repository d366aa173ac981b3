// Panel authentication
//
// Cookie-based session login. The login path differs by panel version
// and deployment (some hide the whole panel behind a web base path), so
// an ordered candidate list is probed and the first success wins. The
// session cookie is captured from the response's Set-Cookie headers,
// with the cookie jar as a fallback source.

use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::Error;
use crate::panel::client::PanelClient;
use crate::panel::models::PanelEnvelope;
use crate::session::{PanelSession, session_cookie_from_set_cookie};

/// Candidate login paths, most common deployments first.
pub const LOGIN_PATHS: &[&str] = &["/login", "/panel/api/login", "/xui/api/login", "/api/login"];

impl PanelClient {
    /// Authenticate with the panel using username/password.
    ///
    /// On success the session cookie is retained as explicit client
    /// state and sent on every subsequent request -- jar propagation is
    /// not assumed. Fails with [`Error::Authentication`] when no
    /// candidate path yields a success envelope.
    pub async fn login(&self) -> Result<(), Error> {
        let body = json!({
            "username": self.username(),
            "password": self.password().expose_secret(),
        });

        for path in LOGIN_PATHS {
            let url = self.api_url(path)?;
            debug!(%url, "attempting panel login");

            let resp = match self.http().post(url).json(&body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(path, error = %e, "login transport failure");
                    continue;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                if !matches!(status.as_u16(), 404 | 301 | 302) {
                    debug!(path, %status, "login candidate rejected");
                }
                continue;
            }

            // Grab Set-Cookie before consuming the body.
            let header_cookie = resp
                .headers()
                .get_all(reqwest::header::SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(session_cookie_from_set_cookie);

            let text = match resp.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path, error = %e, "login body read failure");
                    continue;
                }
            };
            let Ok(envelope) = serde_json::from_str::<PanelEnvelope>(&text) else {
                continue;
            };
            if !envelope.success {
                debug!(path, msg = %envelope.msg, "login refused");
                continue;
            }

            let cookie_header = match header_cookie {
                Some(value) => format!("{}={value}", crate::session::SESSION_COOKIE),
                // Some panel builds emit Set-Cookie attributes reqwest
                // won't surface per-header; fall back to the jar.
                None => match self.jar_cookie_header() {
                    Some(jar) => jar,
                    None => {
                        warn!(path, "login succeeded but no session cookie was captured");
                        continue;
                    }
                },
            };

            debug!(path, "panel login successful");
            self.store_session(PanelSession::new(cookie_header));
            return Ok(());
        }

        Err(Error::Authentication {
            message: format!(
                "no login path accepted the credentials (tried {})",
                LOGIN_PATHS.join(", ")
            ),
        })
    }

    /// Log in if no session is currently held.
    pub(crate) async fn ensure_session(&self) -> Result<(), Error> {
        if self.has_session() {
            return Ok(());
        }
        self.login().await
    }
}
