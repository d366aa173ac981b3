use thiserror::Error;

/// Top-level error type for the `xprov-api` crate.
///
/// Covers every failure mode of the panel's control plane: endpoint
/// discovery, session auth, transport, envelope decoding. `xprov-core`
/// maps these into its own reconciliation taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login failed on every candidate path (wrong credentials, or the
    /// panel rejected the session).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The panel answered 401 -- the session cookie expired or was revoked.
    #[error("Session expired -- re-authentication required")]
    SessionExpired,

    // ── Endpoint discovery ──────────────────────────────────────────
    /// Every candidate endpoint for an operation was tried and none
    /// answered with a success envelope.
    #[error("No working {what} endpoint (tried {})", tried.join(", "))]
    Discovery {
        what: &'static str,
        tried: Vec<String>,
    },

    // ── Panel API ───────────────────────────────────────────────────
    /// The panel answered with `success: false`.
    #[error("Panel rejected the request: {message}")]
    Panel { message: String },

    /// The requested inbound id is not in the panel's inbound list.
    #[error("Inbound {inbound_id} not found on the panel")]
    InboundNotFound { inbound_id: u32 },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates auth has expired
    /// and re-authentication might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
