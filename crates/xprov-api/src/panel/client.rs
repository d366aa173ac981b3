// Panel API HTTP client
//
// Wraps `reqwest::Client` with panel-specific URL construction (base URL
// + optional web base path), envelope unwrapping, explicit session-cookie
// handling, and the ordered candidate-endpoint fallback every operation
// uses -- exact paths vary by panel version and deployment, so each
// operation carries a list of candidates and the first success wins.
// Endpoint groups (auth, inbounds) are implemented as inherent methods
// in separate files to keep this module focused on transport mechanics.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::Method;
use reqwest::cookie::{CookieStore, Jar};
use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::cache::InboundCache;
use crate::error::Error;
use crate::panel::models::PanelEnvelope;
use crate::session::PanelSession;
use crate::transport::TransportConfig;

/// How long to let the proxy settle after a restart before re-reading
/// its configuration for verification.
pub const DEFAULT_RESTART_SETTLE: Duration = Duration::from_secs(2);

/// How many post-restart verification reads to attempt before giving up
/// and reporting the write as unverified.
pub(crate) const VERIFY_ATTEMPTS: u32 = 2;

/// One endpoint candidate in an ordered fallback list.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub method: Method,
    pub path: String,
}

impl Candidate {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
        }
    }
}

/// Raw HTTP client for the panel's control-plane API.
///
/// Owns the session lifecycle: [`login`](Self::login) acquires the
/// session cookie, every request sends it explicitly, and any 401
/// invalidates it (the next request re-authenticates). The cookie jar
/// is kept as a fallback source because some panel builds set cookie
/// attributes the jar handles better than header scraping.
pub struct PanelClient {
    http: reqwest::Client,
    base_url: Url,
    web_base_path: String,
    username: String,
    password: SecretString,
    cookie_jar: Option<Arc<Jar>>,
    session: RwLock<Option<PanelSession>>,
    cache: InboundCache,
    restart_settle: Duration,
}

impl PanelClient {
    /// Create a new client from the panel URL (which may embed a web
    /// base path, e.g. `https://host:2053/secret-prefix/`).
    ///
    /// If the transport config doesn't already include a cookie jar,
    /// one is created automatically (session auth requires cookies).
    pub fn new(
        panel_url: &Url,
        username: String,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let config = if transport.cookie_jar.is_some() {
            transport.clone()
        } else {
            transport.clone().with_cookie_jar()
        };
        let cookie_jar = config.cookie_jar.clone();
        let http = config.build_client()?;

        let mut base_url = panel_url.clone();
        let web_base_path = base_url.path().trim_end_matches('/').to_owned();
        base_url.set_path("");

        Ok(Self {
            http,
            base_url,
            web_base_path,
            username,
            password,
            cookie_jar,
            session: RwLock::new(None),
            cache: InboundCache::new(),
            restart_settle: DEFAULT_RESTART_SETTLE,
        })
    }

    /// Override the post-restart settle delay (tests use zero).
    pub fn with_restart_settle(mut self, settle: Duration) -> Self {
        self.restart_settle = settle;
        self
    }

    /// The panel base URL (scheme + host + port, no web base path).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The deployment's web base path prefix, possibly empty.
    pub fn web_base_path(&self) -> &str {
        &self.web_base_path
    }

    /// The inbound descriptor cache.
    pub fn cache(&self) -> &InboundCache {
        &self.cache
    }

    pub(crate) fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &SecretString {
        &self.password
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn restart_settle(&self) -> Duration {
        self.restart_settle
    }

    // ── Session state ────────────────────────────────────────────────

    /// Whether a session cookie is currently held.
    pub fn has_session(&self) -> bool {
        self.session.read().expect("session lock poisoned").is_some()
    }

    pub(crate) fn store_session(&self, session: PanelSession) {
        debug!("storing panel session cookie");
        *self.session.write().expect("session lock poisoned") = Some(session);
    }

    pub(crate) fn clear_session(&self) {
        trace!("clearing panel session");
        *self.session.write().expect("session lock poisoned") = None;
    }

    pub(crate) fn session_cookie(&self) -> Option<String> {
        self.session
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|s| s.cookie_header.clone())
    }

    /// Extract the cookie header value from the jar, as a fallback when
    /// no Set-Cookie header could be scraped at login time.
    pub(crate) fn jar_cookie_header(&self) -> Option<String> {
        let jar = self.cookie_jar.as_ref()?;
        let cookies = jar.cookies(&self.base_url)?;
        cookies.to_str().ok().map(String::from)
    }

    // ── URL / request plumbing ───────────────────────────────────────

    /// Build a full URL: `{base}{web_base_path}{path}`.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let full = format!("{base}{}{path}", self.web_base_path);
        Ok(Url::parse(&full)?)
    }

    /// Send one request with the session cookie applied.
    pub(crate) async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, Error> {
        let url = self.api_url(path)?;
        trace!(%url, %method, "panel request");

        let mut builder = self.http.request(method, url);
        if let Some(cookie) = self.session_cookie() {
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.send().await.map_err(Error::Transport)
    }

    // ── Candidate fallback ───────────────────────────────────────────

    /// Try each candidate in order; the first `200` with a `success`
    /// envelope wins. A 401 invalidates the session, re-authenticates
    /// once, and retries the same candidate. Exhausting the list yields
    /// [`Error::Discovery`].
    pub(crate) async fn try_candidates(
        &self,
        what: &'static str,
        candidates: &[Candidate],
        body: Option<&Value>,
    ) -> Result<PanelEnvelope, Error> {
        self.ensure_session().await?;

        let mut tried = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            tried.push(candidate.path.clone());
            match self.attempt(candidate, body).await {
                Ok(Some(envelope)) => {
                    debug!(path = %candidate.path, "{what} succeeded");
                    return Ok(envelope);
                }
                Ok(None) => {}
                Err(Error::SessionExpired) => {
                    debug!("session expired mid-operation -- re-authenticating");
                    self.login().await?;
                    if let Ok(Some(envelope)) = self.attempt(candidate, body).await {
                        debug!(path = %candidate.path, "{what} succeeded after re-auth");
                        return Ok(envelope);
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(path = %candidate.path, error = %e, "transient failure, trying next candidate");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Discovery { what, tried })
    }

    /// One candidate attempt. `Ok(None)` means "keep trying" (404,
    /// redirect, or an unsuccessful envelope).
    async fn attempt(
        &self,
        candidate: &Candidate,
        body: Option<&Value>,
    ) -> Result<Option<PanelEnvelope>, Error> {
        let resp = self
            .send(candidate.method.clone(), &candidate.path, body)
            .await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.clear_session();
            return Err(Error::SessionExpired);
        }
        if !status.is_success() {
            trace!(path = %candidate.path, %status, "candidate rejected");
            return Ok(None);
        }

        let text = resp.text().await.map_err(Error::Transport)?;
        match serde_json::from_str::<PanelEnvelope>(&text) {
            Ok(envelope) if envelope.success => Ok(Some(envelope)),
            Ok(envelope) => {
                debug!(path = %candidate.path, msg = %envelope.msg, "candidate answered success=false");
                Ok(None)
            }
            Err(e) => {
                trace!(path = %candidate.path, error = %e, "candidate body is not an envelope");
                Ok(None)
            }
        }
    }
}
